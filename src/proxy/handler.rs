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

// knitmesh - HTTP proxy handler (C5)
//
// Request rewriting, cache-key derivation, and the mesh-aware caching
// pipeline. Grounded on `knit.proxy.HTTPProxyServer.__iter__` for the
// pipeline shape and `mesh::server::MeshServer`'s error-swallowing style for
// how origin/cache failures are handled without tearing anything down.

use std::sync::Arc;

use reqwest::redirect::Policy;
use reqwest::{Client, Method};

use crate::cache::{CacheBackend, CacheEntry, MeshCache};
use crate::error::{Error, KnitResult};

use super::environ::RequestEnvironment;
use super::headers::{cache_control_ttl, rewrite_headers};
use super::rules::{compile_rules, default_methods, default_rules, derive_key, CacheRule};

/// Backend origin this handler forwards to. `(host, port)`, matching
/// spec.md's `http.backend` configuration input.
#[derive(Debug, Clone)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
}

/// A materialized HTTP response: status line split into code/reason,
/// rewritten headers, and the full body. Mirrors `CacheEntry`'s shape
/// exactly (the pipeline stores this same triple in the cache).
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    fn bad_gateway(message: &str) -> Self {
        Self {
            status: 502,
            reason: "Bad Gateway".to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: message.as_bytes().to_vec(),
        }
    }

    fn from_cache_entry(entry: CacheEntry) -> KnitResult<Self> {
        let (status, reason) = parse_status_line(&entry.status_line)?;

        Ok(Self {
            status,
            reason,
            headers: entry.headers,
            body: entry.body,
        })
    }

    fn to_cache_entry(&self) -> CacheEntry {
        CacheEntry {
            body: self.body.clone(),
            status_line: format!("{} {}", self.status, self.reason),
            headers: self.headers.clone(),
        }
    }
}

/// `"200 OK"` -> `(200, "OK")`. A cache hit whose stored status line
/// doesn't parse this way is `Error::MalformedCacheEntry` — the spec's "a
/// cache hit that does not deserialize to a (body, status, headers) triple"
/// condition, expressed against the one field a typed `CacheBackend` can't
/// validate for us up front.
fn parse_status_line(line: &str) -> KnitResult<(u16, String)> {
    let mut parts = line.splitn(2, ' ');

    let code: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::MalformedCacheEntry)?;

    let reason = parts.next().unwrap_or("").to_string();

    Ok((code, reason))
}

pub struct ProxyHandler<B: CacheBackend> {
    backend: BackendAddress,
    cache: Arc<MeshCache<B>>,
    cache_methods: Vec<String>,
    cache_rules: Vec<CacheRule>,
    max_body_bytes: usize,
    http_client: Client,
}

impl<B: CacheBackend> ProxyHandler<B> {
    pub fn new(backend: BackendAddress, cache: Arc<MeshCache<B>>, max_body_bytes: usize) -> KnitResult<Self> {
        let http_client = Client::builder().redirect(Policy::none()).build()?;

        Ok(Self {
            backend,
            cache,
            cache_methods: default_methods(),
            cache_rules: default_rules()?,
            max_body_bytes,
            http_client,
        })
    }

    /// Mirrors `setCacheMethods`: an empty iterable is a no-op, the
    /// defaults survive.
    pub fn set_cache_methods(&mut self, methods: Vec<String>) {
        if methods.is_empty() {
            return;
        }

        self.cache_methods = methods.into_iter().map(|m| m.to_uppercase()).collect();
    }

    /// Mirrors `setCacheRules`: an empty iterable is a no-op; a non-empty
    /// one replaces the defaults wholesale and is compiled eagerly.
    pub fn set_cache_rules(&mut self, rules: Vec<(String, String)>) -> KnitResult<()> {
        if rules.is_empty() {
            return Ok(());
        }

        self.cache_rules = compile_rules(&rules)?;
        Ok(())
    }

    fn backend_url(&self, env: &RequestEnvironment) -> String {
        let mut url = format!(
            "{}://{}:{}{}",
            env.scheme, self.backend.host, self.backend.port, env.path
        );

        if !env.query.is_empty() {
            url.push('?');
            url.push_str(&env.query);
        }

        url
    }

    fn cache_key(&self, env: &RequestEnvironment, url: &str) -> Option<String> {
        if !self
            .cache_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&env.method))
        {
            return None;
        }

        derive_key(&self.cache_rules, env, url)
    }

    /// Run the full pipeline: cache lookup, origin fetch on miss, response
    /// caching on a hit-worthy miss, and reply. `body` is the downstream
    /// request body, forwarded unchanged to origin; it participates in
    /// neither the cache key nor the cache entry (only responses are
    /// cached, per spec.md §4.5).
    pub async fn handle(&self, env: &RequestEnvironment, body: Vec<u8>) -> ProxyResponse {
        let url = self.backend_url(env);
        let key = self.cache_key(env, &url);

        if let Some(key) = &key {
            if let Some(entry) = self.cache.get(key).await {
                match ProxyResponse::from_cache_entry(entry) {
                    Ok(response) => return response,
                    Err(e) => debug!(
                        "cache hit for {} failed to decode ({}), falling through to origin",
                        key, e
                    ),
                }
            }
        }

        let response = match self.fetch_from_origin(env, &url, body).await {
            Ok(response) => response,
            Err(e) => {
                error!("origin fetch failed for {}: {}", url, e);
                return ProxyResponse::bad_gateway("upstream request failed");
            }
        };

        if let Some(key) = key {
            let ttl = cache_control_ttl(response.header("cache-control"));

            if ttl > 0 && response.body.len() <= self.max_body_bytes {
                self.cache.set(&key, response.to_cache_entry(), ttl, true).await;
            } else if ttl > 0 {
                debug!(
                    "response for {} exceeds max_body_bytes ({} > {}), not caching",
                    url,
                    response.body.len(),
                    self.max_body_bytes
                );
            }
        }

        response
    }

    async fn fetch_from_origin(
        &self,
        env: &RequestEnvironment,
        url: &str,
        body: Vec<u8>,
    ) -> KnitResult<ProxyResponse> {
        let method = Method::from_bytes(env.method.as_bytes())
            .map_err(|_| Error::Config(format!("invalid HTTP method {:?}", env.method)))?;

        let mut request = self.http_client.request(method, url);

        for (name, value) in rewrite_headers(&env.headers) {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }

            request = request.header(name.as_str(), value.as_str());
        }

        request = request.header("Host", self.backend.host.clone());

        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::OriginUnreachable(e.to_string()))?;

        let status = response.status();

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or("").to_string()))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::OriginUnreachable(e.to_string()))?
            .to_vec();

        Ok(ProxyResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers: rewrite_headers(&headers),
            body,
        })
    }
}

impl ProxyResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::mesh::MeshServer;

    async fn handler() -> ProxyHandler<MemoryCacheBackend> {
        let mesh = MeshServer::bind("127.0.0.1", 19800, 16).await.unwrap();
        let cache = Arc::new(MeshCache::new(MemoryCacheBackend::new(), mesh));

        ProxyHandler::new(
            BackendAddress {
                host: "backend.internal".to_string(),
                port: 80,
            },
            cache,
            2 * 1024 * 1024,
        )
        .unwrap()
    }

    fn env(method: &str, path: &str) -> RequestEnvironment {
        RequestEnvironment {
            method: method.to_string(),
            path: path.to_string(),
            query: String::new(),
            scheme: "http".to_string(),
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn backend_url_includes_query_string() {
        let h = handler().await;
        let mut e = env("GET", "/widgets");
        e.query = "id=1".to_string();

        assert_eq!(h.backend_url(&e), "http://backend.internal:80/widgets?id=1");
    }

    #[tokio::test]
    async fn non_cacheable_method_produces_no_key() {
        let h = handler().await;
        let e = env("POST", "/widgets");
        let url = h.backend_url(&e);

        assert!(h.cache_key(&e, &url).is_none());
    }

    #[tokio::test]
    async fn cacheable_method_produces_a_key_under_default_rules() {
        let h = handler().await;
        let e = env("GET", "/widgets");
        let url = h.backend_url(&e);

        assert!(h.cache_key(&e, &url).is_some());
    }

    #[tokio::test]
    async fn set_cache_methods_ignores_empty_input() {
        let mut h = handler().await;
        h.set_cache_methods(vec![]);

        let e = env("GET", "/widgets");
        let url = h.backend_url(&e);
        assert!(h.cache_key(&e, &url).is_some());
    }

    #[tokio::test]
    async fn malformed_cached_status_line_falls_back_to_origin_path() {
        let h = handler().await;
        let key = "GET /widgets? ";

        h.cache
            .set(
                key,
                CacheEntry {
                    body: b"hi".to_vec(),
                    status_line: "not-a-status".to_string(),
                    headers: vec![],
                },
                60,
                false,
            )
            .await;

        let entry = h.cache.get(key).await.unwrap();
        assert!(matches!(
            ProxyResponse::from_cache_entry(entry),
            Err(Error::MalformedCacheEntry)
        ));
    }

    #[test]
    fn status_line_parses_code_and_reason() {
        assert_eq!(parse_status_line("200 OK").unwrap(), (200, "OK".to_string()));
        assert!(parse_status_line("nope").is_err());
    }
}
