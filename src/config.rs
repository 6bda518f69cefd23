// knitmesh - mesh-replicated caching HTTP reverse proxy
// Copyright (C) 2026  knitmesh contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

// knitmesh - configuration surface (C6)
//
// Typed mirror of spec.md §6's configuration inputs, loaded from YAML (the
// original's PyYAML settings file; the teacher's own `Config` in `config.rs`
// is TOML-based but the wire protocol and settings file in the original both
// speak YAML, so `serde_yaml` is kept here instead).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, KnitResult};

fn default_mesh_queue() -> u32 {
    128
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn default_cache_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_cache_rules() -> Vec<(String, String)> {
    vec![(
        ".*".to_string(),
        "%(REQUEST_METHOD)s %(PATH_INFO)s?%(QUERY_STRING)s %(HTTP_COOKIE)s".to_string(),
    )]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub mesh: MeshConfig,
    pub http: HttpConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct MeshConfig {
    pub base_port: u16,

    #[serde(default = "default_mesh_queue")]
    pub queue: u32,

    /// `host:port` of a seed peer to discover against. Absent means this
    /// peer starts as its own one-node mesh.
    #[serde(default)]
    pub discover: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub frontend: Address,
    pub backend: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    #[serde(default = "default_cache_methods")]
    pub methods: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_cache_rules")]
    pub rules: Vec<(String, String)>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            methods: default_cache_methods(),
            max_body_bytes: default_max_body_bytes(),
            rules: default_cache_rules(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> KnitResult<Self> {
        let bytes = std::fs::read(path)?;
        let config: Config = serde_yaml::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> KnitResult<()> {
        if self.cache.methods.is_empty() {
            return Err(Error::Config("cache.methods must not be empty".into()));
        }

        if self.cache.rules.is_empty() {
            return Err(Error::Config("cache.rules must not be empty".into()));
        }

        Ok(())
    }

    /// Parse `mesh.discover` as a socket address, if present.
    pub fn discover_addr(&self) -> KnitResult<Option<std::net::SocketAddr>> {
        match &self.mesh.discover {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::Config(format!("invalid mesh.discover address {:?}", raw))),
        }
    }
}

/// Kept so `cache.backend` has somewhere to resolve to beyond the bare
/// string; the core only ships `memory`, matching spec.md's "pluggable
/// cache backend... treat as external collaborator" — unknown names are a
/// config error rather than a silent fallback.
pub fn known_backends() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("memory", "in-process HashMap-backed cache, no persistence");
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_sections() {
        let yaml = r#"
mesh:
  base_port: 9000
http:
  frontend: { host: "0.0.0.0", port: 8080 }
  backend: { host: "backend.internal", port: 80 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mesh.queue, 128);
        assert_eq!(config.cache.methods, vec!["GET", "HEAD"]);
        assert_eq!(config.cache.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.log.level, "info");
        assert!(config.mesh.discover.is_none());
    }

    #[test]
    fn discover_parses_host_port() {
        let yaml = r#"
mesh:
  base_port: 9000
  discover: "127.0.0.1:9001"
http:
  frontend: { host: "0.0.0.0", port: 8080 }
  backend: { host: "backend.internal", port: 80 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let addr = config.discover_addr().unwrap().unwrap();
        assert_eq!(addr.port(), 9001);
    }
}
