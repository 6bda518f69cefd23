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

// knitmesh - peer discovery and cache-write replication mesh
//
// Three pieces compose this layer: `socket` (C1, the framed wire protocol),
// `node` (C2, a remote peer handle), and `server` (C3, local identity,
// membership table, accept loop, and broadcast). See protocol.rs for the
// frame format itself.

mod node;
mod server;
mod socket;

pub use node::Node;
pub use server::MeshServer;
pub use socket::FramedMessageSocket;

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, KnitResult};

/// Maximum number of consecutive ports tried from a configured base port
/// before giving up. The original source's scan condition never actually
/// bounded the loop; this constant is the fix (see DESIGN.md).
pub const PORT_RANGE: u16 = 1000;

/// `[host, port]` wire shape used by `RegisterNewServer` and the values of
/// `GetNodeList`'s mapping.
pub type AddressPayload = (String, u16);

pub fn address_to_payload(addr: SocketAddr) -> AddressPayload {
    (addr.ip().to_string(), addr.port())
}

pub fn payload_to_address(payload: &AddressPayload) -> KnitResult<SocketAddr> {
    let ip: IpAddr = payload
        .0
        .parse()
        .map_err(|_| Error::Config(format!("invalid peer address host {:?}", payload.0)))?;

    Ok(SocketAddr::new(ip, payload.1))
}

/// Derive a process-unique, stable hex token from a one-time seed
/// (timestamp, random draw, host name), collapsed through `blake3` to a
/// fixed-width 32 hex character string (the 128-bit equivalent of the
/// original's MD5 digest).
pub fn generate_token() -> String {
    use rand::Rng;

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let rand_component: u64 = rand::thread_rng().gen();

    let hostname = hostname();

    let seed = format!("{}-{}-{}", stamp, rand_component, hostname);

    blake3::hash(seed.as_bytes()).to_hex()[..32].to_string()
}

fn hostname() -> String {
    // No portable stdlib accessor; fall back to a machine identifier that's
    // at least process-local if the environment doesn't expose one.
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_not_trivially_repeated() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }

    #[test]
    fn address_payload_round_trips() {
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let payload = address_to_payload(addr);
        let back = payload_to_address(&payload).unwrap();
        assert_eq!(addr, back);
    }
}
