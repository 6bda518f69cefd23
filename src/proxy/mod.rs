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

// knitmesh - HTTP proxy + caching pipeline (C5), configuration surface (C6)
//
// `environ` builds the request-environment view cache-key templates read
// from; `headers` holds hop-by-hop stripping, title-casing, and
// `Cache-Control` TTL parsing; `rules` compiles cache-key rules and derives
// keys; `handler` is the pipeline itself. See mesh::mod for the analogous
// split on the mesh side.

mod environ;
mod handler;
mod headers;
mod rules;

pub use environ::RequestEnvironment;
pub use handler::{BackendAddress, ProxyHandler, ProxyResponse};
