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

// knitmesh - HTTP front-end (ambient; wires the downstream listener into
// proxy::ProxyHandler)
//
// spec.md §1 treats "the TCP server front-end wiring of the HTTP listener"
// as an external collaborator; this is that wiring, built with `hyper`
// (already the transport underneath `reqwest`, the teacher's own HTTP
// client crate) the way the rest of the corpus stands up a plain HTTP/1.1
// listener over tokio.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};

use crate::cache::CacheBackend;
use crate::error::KnitResult;
use crate::proxy::{ProxyHandler, RequestEnvironment};

/// Serve downstream HTTP/1.1 connections at `addr`, dispatching each
/// request into `handler`. Runs until the process is torn down; errors
/// from individual connections never escape (`hyper` already isolates
/// per-connection failures), matching spec.md §7's "nothing may crash the
/// server" policy.
pub async fn serve<B>(addr: SocketAddr, handler: Arc<ProxyHandler<B>>) -> KnitResult<()>
where
    B: CacheBackend + 'static,
{
    let make_svc = make_service_fn(move |_conn| {
        let handler = handler.clone();

        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handle(handler, req).await) }
            }))
        }
    });

    info!("HTTP frontend listening on {}", addr);

    let server = Server::bind(&addr).serve(make_svc);

    if let Err(e) = server.await {
        error!("HTTP frontend server error: {}", e);
    }

    Ok(())
}

async fn handle<B>(handler: Arc<ProxyHandler<B>>, req: Request<Body>) -> Response<Body>
where
    B: CacheBackend,
{
    let env = request_environment(&req);

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!("failed to read downstream request body: {}", e);
            return Response::builder()
                .status(400)
                .body(Body::from("failed to read request body"))
                .unwrap_or_else(|_| Response::new(Body::from("bad request")));
        }
    };

    let response = handler.handle(&env, body).await;

    let mut builder = Response::builder().status(response.status);

    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| Response::new(Body::from("internal response build error")))
}

/// Plain HTTP/1.1 front-end: the downstream scheme is always `http`
/// (TLS termination, if any, is expected to happen in front of this
/// process — spec.md §1 excludes it from the core's scope).
fn request_environment(req: &Request<Body>) -> RequestEnvironment {
    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    RequestEnvironment {
        method: req.method().as_str().to_string(),
        path: req.uri().path().to_string(),
        query: req.uri().query().unwrap_or("").to_string(),
        scheme: "http".to_string(),
        headers,
    }
}
