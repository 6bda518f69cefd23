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

// knitmesh - remote peer handle (C2)

use std::net::SocketAddr;

use serde::Serialize;
use tokio::net::TcpStream;

use crate::error::{Error, KnitResult};
use crate::protocol::{Action, Message};

use super::socket::FramedMessageSocket;
use super::{address_to_payload, AddressPayload};

/// Local handle to a remote mesh peer. Constructing a `Node` without an
/// already-known token performs a blocking `RegisterNewServer` RPC and
/// adopts the responder's sender token; this stays stable for the node's
/// lifetime even across reconnects, since every RPC is a fresh connection.
#[derive(Debug, Clone)]
pub struct Node {
    address: SocketAddr,
    token: String,
}

impl Node {
    /// Register against `address`, advertising `local_address` as this
    /// peer's own callback address, and adopt the reply's sender token.
    pub async fn register(
        local_token: &str,
        local_address: SocketAddr,
        address: SocketAddr,
    ) -> KnitResult<Self> {
        let payload: AddressPayload = address_to_payload(local_address);
        let reply = rpc(local_token, address, Action::RegisterNewServer, &payload).await?;

        Ok(Self {
            address,
            token: reply.sender_token,
        })
    }

    /// Build a handle for a peer whose token is already known (e.g. learned
    /// passively from an inbound frame, or returned by `GetNodeList`).
    pub fn with_token(address: SocketAddr, token: String) -> Self {
        Self { address, token }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Open a fresh connection, send one framed message, read the framed
    /// reply, and close. Blocks the calling task until complete.
    pub async fn send_message(
        &self,
        local_token: &str,
        action: Action,
        payload: &impl Serialize,
    ) -> KnitResult<Message> {
        rpc(local_token, self.address, action, payload).await
    }
}

async fn rpc(
    local_token: &str,
    address: SocketAddr,
    action: Action,
    payload: &impl Serialize,
) -> KnitResult<Message> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(Error::PeerUnreachable)?;

    let mut socket = FramedMessageSocket::new(stream);
    socket.send(local_token, action, payload).await?;
    let reply = socket.recv().await?;
    socket.close().await;

    Ok(reply)
}
