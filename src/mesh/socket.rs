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

// knitmesh - framed message socket (C1)
//
// One request frame, then one reply frame, per TCP connection. Framing is
// intentionally one-shot: callers open a fresh connection per RPC.

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, KnitResult};
use crate::protocol::{decode_frame, encode_frame, Action, Message, FRAME_TERMINATOR};

/// Suggested chunk size for each `recv` read, per spec.
const RECV_CHUNK: usize = 1024;

pub struct FramedMessageSocket {
    stream: TcpStream,
}

impl FramedMessageSocket {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Write one complete frame, looping until every byte is accepted.
    pub async fn send(
        &mut self,
        local_token: &str,
        action: Action,
        payload: &impl Serialize,
    ) -> KnitResult<()> {
        let frame = encode_frame(local_token, action, payload)?;

        let mut sent = 0;
        while sent < frame.len() {
            let n = self.stream.write(&frame[sent..]).await?;

            if n == 0 {
                return Err(Error::TransportBroken);
            }

            sent += n;
        }

        Ok(())
    }

    /// Read chunks until the buffer ends with the frame terminator or the
    /// peer closes the connection, then decode the accumulated frame.
    pub async fn recv(&mut self) -> KnitResult<Message> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; RECV_CHUNK];

        loop {
            match self.stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);

                    if buf.ends_with(FRAME_TERMINATOR.as_bytes()) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(Error::from(e)),
            }
        }

        decode_frame(&buf)
    }

    /// Half-shutdown both directions and drop the socket. Failures are
    /// swallowed, matching the original's best-effort close.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_then_recv_round_trips_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = FramedMessageSocket::new(stream);
            let msg = socket.recv().await.unwrap();
            socket
                .send("server-token", Action::Ok, &msg.payload)
                .await
                .unwrap();
            socket.close().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = FramedMessageSocket::new(stream);
        client
            .send("client-token", Action::GetNodeList, &"hello")
            .await
            .unwrap();

        let reply = client.recv().await.unwrap();
        client.close().await;
        server.await.unwrap();

        assert_eq!(reply.sender_token, "server-token");
        assert_eq!(reply.action, Action::Ok);

        let payload: String = reply.payload_as().unwrap();
        assert_eq!(payload, "hello");
    }

    #[tokio::test]
    async fn recv_reports_malformed_frame_on_garbage() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = FramedMessageSocket::new(stream);
            let result = socket.recv().await;
            assert!(matches!(result, Err(Error::MalformedFrame)));
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"not a real frame").await.unwrap();
        stream.shutdown().await.unwrap();

        server.await.unwrap();
    }
}
