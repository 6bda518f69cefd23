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

// knitmesh - error taxonomy shared across the mesh and proxy layers

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("malformed frame")]
    MalformedFrame,

    #[error("transport broken")]
    TransportBroken,

    #[error("peer unreachable: {0}")]
    PeerUnreachable(std::io::Error),

    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),

    #[error("malformed cache entry")]
    MalformedCacheEntry,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bind range exhausted starting at port {0}")]
    BindExhausted(u16),
}

pub type KnitResult<T> = std::result::Result<T, Error>;
