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

// knitmesh - mesh server (C3): local identity, membership table, accept
// loop, and broadcast fan-out.
//
// State machine of the accept loop:
//
//   IDLE --(accept succeeds)--> DISPATCHING --(reply sent or error)--> IDLE
//   IDLE --(accept timeout)--> IDLE  (check stop channel)
//   IDLE --(stop observed)--> TERMINATED
//   DISPATCHING: any handler error is caught, logged, and returns to IDLE

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use socket2::{Domain, Socket, Type};
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};

use crate::cache::{CacheEntry, CacheSink};
use crate::error::{Error, KnitResult};
use crate::protocol::{Action, Message};

use super::node::Node;
use super::socket::FramedMessageSocket;
use super::{address_to_payload, generate_token, payload_to_address, AddressPayload, PORT_RANGE};

/// Bounds how long the accept loop can be unresponsive to a stop signal.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MeshServer {
    token: OnceCell<String>,
    local_address: SocketAddr,
    listener: tokio::net::TcpListener,
    membership: RwLock<HashMap<String, Node>>,
    cache_sink: OnceCell<Arc<dyn CacheSink>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl MeshServer {
    /// Scan upward from `base_port` through at most `PORT_RANGE` consecutive
    /// ports until one binds. The original source's scan condition
    /// (`port <= port + PORT_RANGE`) was vacuously true and looped forever
    /// on persistent bind failure; this bounds the attempt and surfaces
    /// `BindExhausted` instead.
    pub async fn bind(host: &str, base_port: u16, queue: u32) -> KnitResult<Arc<Self>> {
        let mut last_err = None;

        for offset in 0..PORT_RANGE {
            let port = base_port.saturating_add(offset);

            let candidate: SocketAddr = match format!("{}:{}", host, port).parse() {
                Ok(addr) => addr,
                Err(_) => return Err(Error::Config(format!("invalid bind host {:?}", host))),
            };

            match bind_std_listener(candidate, queue as i32) {
                Ok(std_listener) => {
                    let listener = tokio::net::TcpListener::from_std(std_listener)?;
                    let local_address = listener.local_addr()?;

                    info!("Mesh server listening on {}", local_address);

                    let (stop_tx, stop_rx) = watch::channel(false);

                    return Ok(Arc::new(Self {
                        token: OnceCell::new(),
                        local_address,
                        listener,
                        membership: RwLock::new(HashMap::new()),
                        cache_sink: OnceCell::new(),
                        stop_tx,
                        stop_rx,
                    }));
                }
                Err(e) => last_err = Some(e),
            }
        }

        warn!(
            "Exhausted {} ports starting at {} ({:?})",
            PORT_RANGE, base_port, last_err
        );

        Err(Error::BindExhausted(base_port))
    }

    /// Lazily generated, process-stable peer token.
    pub fn token(&self) -> &str {
        self.token.get_or_init(generate_token)
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Install the cache sink that inbound `SaveCacheEntry` frames write
    /// into. Mirrors the original's post-construction `setCacheBackend`.
    pub fn set_cache_sink(&self, sink: Arc<dyn CacheSink>) {
        let _ = self.cache_sink.set(sink);
    }

    /// Register against `seed`, then ask it for its full membership and
    /// register against every peer it returns (skipping ourselves).
    pub async fn discover(self: &Arc<Self>, seed: SocketAddr) -> KnitResult<()> {
        let local_token = self.token().to_string();

        let seed_node = Node::register(&local_token, self.local_address, seed).await?;
        self.insert_node(seed_node.clone()).await;

        let reply = seed_node
            .send_message(&local_token, Action::GetNodeList, &())
            .await?;

        let peers: HashMap<String, AddressPayload> = reply.payload_as()?;

        for (peer_token, payload) in peers {
            if peer_token == local_token {
                continue;
            }

            let addr = match payload_to_address(&payload) {
                Ok(addr) => addr,
                Err(e) => {
                    warn!("discovered peer {} has invalid address: {}", peer_token, e);
                    continue;
                }
            };

            match Node::register(&local_token, self.local_address, addr).await {
                Ok(node) => self.insert_node(node).await,
                Err(e) => error!("failed to register with discovered peer {}: {}", addr, e),
            }
        }

        Ok(())
    }

    /// Fan out a `SaveCacheEntry` to every current member, off the accept
    /// loop. Per-peer failures are logged and never raised; broadcasts may
    /// overlap and peers may observe writes in different orders.
    pub fn replicate_cache_entry(self: &Arc<Self>, key: String, value: CacheEntry, ttl_secs: i64) {
        let this = self.clone();

        tokio::spawn(async move {
            let local_token = this.token().to_string();

            let snapshot: Vec<Node> = {
                let membership = this.membership.read().await;
                membership.values().cloned().collect()
            };

            for node in snapshot {
                let payload = (key.clone(), value.clone(), ttl_secs);

                match node
                    .send_message(&local_token, Action::SaveCacheEntry, &payload)
                    .await
                {
                    Ok(reply) if reply.action == Action::Ok => {}
                    Ok(reply) => error!(
                        "peer {} acknowledged SaveCacheEntry with {} instead of Ok.",
                        node.token(),
                        reply.action
                    ),
                    Err(e) => error!(
                        "failed to replicate cache entry to peer {}: {}",
                        node.token(),
                        e
                    ),
                }
            }
        });
    }

    pub fn stop(&self) {
        info!("Sending halt signal to mesh server.");
        let _ = self.stop_tx.send(true);
    }

    pub async fn membership_tokens(&self) -> Vec<String> {
        self.membership.read().await.keys().cloned().collect()
    }

    /// Run the accept loop until `stop()` is called. Bounded by
    /// `ACCEPT_TIMEOUT` between checks of the stop signal.
    pub async fn up(self: Arc<Self>) {
        let mut stop_rx = self.stop_rx.clone();

        info!("Started processing mesh connections");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                accepted = tokio::time::timeout(ACCEPT_TIMEOUT, self.listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, peer_addr))) => {
                            debug!("Incoming connection from {}", peer_addr);

                            if let Err(e) = self.handle_connection(stream, peer_addr).await {
                                error!("mesh connection error from {}: {}", peer_addr, e);
                            }
                        }
                        Ok(Err(e)) => error!("mesh accept error: {}", e),
                        Err(_elapsed) => {}
                    }
                }
            }
        }

        info!("Mesh server exiting now.");
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> KnitResult<()> {
        let mut socket = FramedMessageSocket::new(stream);
        let request = socket.recv().await?;

        self.learn_sender(&request.sender_token, peer_addr).await;

        let local_token = self.token().to_string();
        let reply_payload = self.dispatch(&request, peer_addr).await;

        socket.send(&local_token, Action::Ok, &reply_payload).await?;
        socket.close().await;

        Ok(())
    }

    /// If the sender is unknown, passively learn it against the socket's
    /// remote address. No outbound registration is performed here; a
    /// subsequent `RegisterNewServer` from the same sender (the common
    /// case) overwrites this with its real advertised address.
    async fn learn_sender(&self, sender_token: &str, peer_addr: SocketAddr) {
        let known = self.membership.read().await.contains_key(sender_token);

        if !known {
            self.insert_node(Node::with_token(peer_addr, sender_token.to_string()))
                .await;
        }
    }

    async fn dispatch(self: &Arc<Self>, request: &Message, peer_addr: SocketAddr) -> serde_yaml::Value {
        match request.action {
            Action::RegisterNewServer => {
                self.handle_register(request, peer_addr).await;
                serde_yaml::Value::Null
            }
            Action::GetNodeList => self.handle_get_node_list(request).await,
            Action::SaveCacheEntry => {
                self.handle_save_cache_entry(request, peer_addr).await;
                serde_yaml::Value::Null
            }
            Action::Ok => {
                warn!("unexpected Ok. action received as a request from {}", peer_addr);
                serde_yaml::Value::Null
            }
        }
    }

    async fn handle_register(&self, request: &Message, peer_addr: SocketAddr) {
        let payload: AddressPayload = match request.payload_as() {
            Ok(payload) => payload,
            Err(_) => {
                warn!("malformed RegisterNewServer payload from {}", peer_addr);
                return;
            }
        };

        let addr = match payload_to_address(&payload) {
            Ok(addr) => addr,
            Err(e) => {
                warn!("invalid RegisterNewServer address from {}: {}", peer_addr, e);
                return;
            }
        };

        info!("Found new node: {} ({})", addr, request.sender_token);

        self.insert_node(Node::with_token(addr, request.sender_token.clone()))
            .await;
    }

    async fn handle_get_node_list(&self, request: &Message) -> serde_yaml::Value {
        let membership = self.membership.read().await;

        let mut nodes = HashMap::new();
        for (token, node) in membership.iter() {
            if token != &request.sender_token {
                nodes.insert(token.clone(), address_to_payload(node.address()));
            }
        }

        serde_yaml::to_value(nodes).unwrap_or(serde_yaml::Value::Null)
    }

    async fn handle_save_cache_entry(&self, request: &Message, peer_addr: SocketAddr) {
        let (key, entry, ttl): (String, CacheEntry, i64) = match request.payload_as() {
            Ok(payload) => payload,
            Err(_) => {
                warn!("malformed SaveCacheEntry payload from {}", peer_addr);
                return;
            }
        };

        debug!(
            "Cache entry push from {} for key {}",
            request.sender_token, key
        );

        // Always written with replication disabled: this is the inbound
        // path, and replicating it back out would storm the mesh.
        if let Some(sink) = self.cache_sink.get() {
            sink.set_local(&key, entry, ttl).await;
        }
    }

    async fn insert_node(&self, node: Node) {
        if node.token() == self.token() {
            return;
        }

        self.membership.write().await.insert(node.token().to_string(), node);
    }
}

fn bind_std_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };

    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheBackend, MeshCache};

    async fn spawn_peer(host: &str, base_port: u16) -> Arc<MeshServer> {
        spawn_peer_with_cache(host, base_port).await.0
    }

    async fn spawn_peer_with_cache(
        host: &str,
        base_port: u16,
    ) -> (Arc<MeshServer>, Arc<MeshCache<MemoryCacheBackend>>) {
        let server = MeshServer::bind(host, base_port, 16).await.unwrap();
        let sink = Arc::new(MeshCache::new(MemoryCacheBackend::new(), server.clone()));
        server.set_cache_sink(sink.clone());
        let up = server.clone();
        tokio::spawn(async move { up.up().await });
        (server, sink)
    }

    #[tokio::test]
    async fn own_token_never_appears_in_own_membership() {
        let a = spawn_peer("127.0.0.1", 19100).await;
        assert!(!a.membership_tokens().await.contains(&a.token().to_string()));
    }

    #[tokio::test]
    async fn discovery_converges_for_three_peers() {
        let a = spawn_peer("127.0.0.1", 19200).await;
        let b = spawn_peer("127.0.0.1", 19300).await;
        let c = spawn_peer("127.0.0.1", 19400).await;

        b.discover(a.local_address()).await.unwrap();
        c.discover(a.local_address()).await.unwrap();

        // give the accept loops a moment to process replies
        tokio::time::sleep(Duration::from_millis(50)).await;

        let a_tokens = a.membership_tokens().await;
        assert!(a_tokens.contains(&b.token().to_string()));
        assert!(a_tokens.contains(&c.token().to_string()));
        assert!(!a_tokens.contains(&a.token().to_string()));

        let c_tokens = c.membership_tokens().await;
        assert!(c_tokens.contains(&a.token().to_string()));
        assert!(c_tokens.contains(&b.token().to_string()));
    }

    #[tokio::test]
    async fn stop_terminates_the_accept_loop_quickly() {
        let server = MeshServer::bind("127.0.0.1", 19500, 16).await.unwrap();
        let sink = Arc::new(MeshCache::new(MemoryCacheBackend::new(), server.clone()));
        server.set_cache_sink(sink);

        let up = server.clone();
        let handle = tokio::spawn(async move { up.up().await });

        server.stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("accept loop should terminate within one accept timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn inbound_save_cache_entry_is_never_rebroadcast() {
        let a = spawn_peer("127.0.0.1", 19600).await;
        let b = spawn_peer("127.0.0.1", 19700).await;

        b.discover(a.local_address()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // b replicates to its membership (a); a's handler must not
        // broadcast further (a's membership is empty of other peers).
        let entry = CacheEntry {
            body: b"hi".to_vec(),
            status_line: "200 OK".to_string(),
            headers: vec![],
        };
        b.replicate_cache_entry("k".to_string(), entry, 60);

        tokio::time::sleep(Duration::from_millis(50)).await;
        // No panics, no infinite storm: reaching here is the assertion.
    }

    #[tokio::test]
    async fn replicate_cache_entry_reaches_every_peer() {
        let (a, a_cache) = spawn_peer_with_cache("127.0.0.1", 19900).await;
        let (b, b_cache) = spawn_peer_with_cache("127.0.0.1", 20000).await;

        b.discover(a.local_address()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let entry = CacheEntry {
            body: b"hello".to_vec(),
            status_line: "200 OK".to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        };

        // b's membership after discovery is {a}; replicating from b should
        // land the entry in a's cache without b ever storing it itself
        // (the fan-out only ever writes to remote peers).
        b.replicate_cache_entry("k".to_string(), entry.clone(), 60);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(a_cache.get("k").await, Some(entry));
        assert_eq!(b_cache.get("k").await, None);
    }
}
