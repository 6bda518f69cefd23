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

// knitmesh - wire message framing
//
// Every frame is `base64(token && action && yaml(payload));;`. `&&` joins the
// three fields before encoding, `;;` terminates the frame. See mesh::socket
// for the send/recv loop that produces and consumes these bytes.

use serde::{de::DeserializeOwned, Serialize};
use serde_yaml::Value;

use crate::error::{Error, KnitResult};

pub const FIELD_SEPARATOR: &str = "&&";
pub const FRAME_TERMINATOR: &str = ";;";

/// Closed set of wire verbs. `Ok` serializes to the literal `"Ok."`, matching
/// the original acknowledgement verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RegisterNewServer,
    GetNodeList,
    SaveCacheEntry,
    Ok,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::RegisterNewServer => "RegisterNewServer",
            Action::GetNodeList => "GetNodeList",
            Action::SaveCacheEntry => "SaveCacheEntry",
            Action::Ok => "Ok.",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RegisterNewServer" => Ok(Action::RegisterNewServer),
            "GetNodeList" => Ok(Action::GetNodeList),
            "SaveCacheEntry" => Ok(Action::SaveCacheEntry),
            "Ok." => Ok(Action::Ok),
            _ => Err(Error::MalformedFrame),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded wire triple. `payload` stays as a generic YAML value until the
/// caller knows which shape to expect for the given `action`.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender_token: String,
    pub action: Action,
    pub payload: Value,
}

impl Message {
    pub fn payload_as<T: DeserializeOwned>(&self) -> KnitResult<T> {
        serde_yaml::from_value(self.payload.clone()).map_err(Error::from)
    }
}

/// Build the framed, base64-wrapped, terminator-suffixed bytes for one
/// request or reply.
pub fn encode_frame(
    sender_token: &str,
    action: Action,
    payload: &impl Serialize,
) -> KnitResult<Vec<u8>> {
    let payload = serde_yaml::to_string(payload)?;

    let joined = format!(
        "{}{}{}{}{}",
        sender_token,
        FIELD_SEPARATOR,
        action,
        FIELD_SEPARATOR,
        payload
    );

    let mut out = base64::encode(joined.as_bytes()).into_bytes();
    out.extend_from_slice(FRAME_TERMINATOR.as_bytes());

    Ok(out)
}

/// Decode a complete frame buffer (terminator included) into its triple.
pub fn decode_frame(buf: &[u8]) -> KnitResult<Message> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::MalformedFrame)?;

    let stripped = text
        .strip_suffix(FRAME_TERMINATOR)
        .ok_or(Error::MalformedFrame)?;

    let decoded = base64::decode(stripped).map_err(|_| Error::MalformedFrame)?;
    let decoded = String::from_utf8(decoded).map_err(|_| Error::MalformedFrame)?;

    let parts: Vec<&str> = decoded.split(FIELD_SEPARATOR).collect();

    if parts.len() != 3 {
        return Err(Error::MalformedFrame);
    }

    let sender_token = parts[0].to_string();
    let action: Action = parts[1].parse()?;
    let payload: Value = serde_yaml::from_str(parts[2])?;

    Ok(Message {
        sender_token,
        action,
        payload,
    })
}
