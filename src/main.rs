#[macro_use]
extern crate log;

use std::env::var;
use std::sync::Arc;

mod cache;
mod config;
mod error;
mod frontend;
mod mesh;
mod protocol;
mod proxy;

use cache::{MemoryCacheBackend, MeshCache};
use config::{Config, LogConfig};
use error::{Error, KnitResult};
use mesh::MeshServer;
use proxy::{BackendAddress, ProxyHandler};

/// `__setupLogging`'s counterpart: `log.level` seeds the default filter
/// (still overridable via `RUST_LOG`), `log.format` drops timestamps when
/// set to anything other than `"full"`.
fn init_logging(log: &LogConfig) {
    let env = env_logger::Env::default().default_filter_or(log.level.clone());
    let mut builder = env_logger::Builder::from_env(env);

    if log.format != "full" {
        builder.format_timestamp(None);
    }

    builder.init();
}

#[tokio::main]
async fn main() -> KnitResult<()> {
    let config_loc = var("KNITMESH_CONFIG").unwrap_or_else(|_| "config.yml".into());
    let config = Config::load(&config_loc)?;

    init_logging(&config.log);

    let mesh = MeshServer::bind(
        &config.http.frontend.host,
        config.mesh.base_port,
        config.mesh.queue,
    )
    .await?;

    if config.cache.backend != "memory" {
        return Err(Error::Config(format!(
            "unknown cache.backend {:?} (only \"memory\" is built in)",
            config.cache.backend
        )));
    }

    let cache = Arc::new(MeshCache::new(MemoryCacheBackend::new(), mesh.clone()));
    mesh.set_cache_sink(cache.clone());

    if let Some(seed) = config.discover_addr()? {
        info!("Discovering mesh network via seed {}", seed);

        if let Err(e) = mesh.discover(seed).await {
            error!("mesh discovery against {} failed: {}", seed, e);
        }
    }

    let mesh_loop = mesh.clone();
    let mesh_task = tokio::spawn(async move { mesh_loop.up().await });

    let mut handler = ProxyHandler::new(
        BackendAddress {
            host: config.http.backend.host.clone(),
            port: config.http.backend.port,
        },
        cache,
        config.cache.max_body_bytes,
    )?;

    handler.set_cache_methods(config.cache.methods.clone());
    handler.set_cache_rules(config.cache.rules.clone())?;

    let handler = Arc::new(handler);

    let frontend_addr = format!("{}:{}", config.http.frontend.host, config.http.frontend.port)
        .parse()
        .map_err(|_| Error::Config("invalid http.frontend address".into()))?;

    info!(
        "Using HTTP backend {}:{}",
        config.http.backend.host, config.http.backend.port
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Caught interrupt signal.");
        }
        result = frontend::serve(frontend_addr, handler) => {
            if let Err(e) = result {
                error!("HTTP frontend exited with error: {}", e);
            }
        }
    }

    info!("Waiting for mesh server to exit.");
    mesh.stop();
    let _ = mesh_task.await;

    info!("Main thread exiting now.");
    Ok(())
}
