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

// knitmesh - mesh-aware cache wrapper (C4)

use std::sync::Arc;

use async_trait::async_trait;

use crate::mesh::MeshServer;

use super::backend::{CacheBackend, CacheEntry};

/// What `MeshServer` calls on an inbound `SaveCacheEntry` — a write that
/// must never itself trigger replication (that would storm the mesh).
#[async_trait]
pub trait CacheSink: Send + Sync {
    async fn set_local(&self, key: &str, entry: CacheEntry, ttl_secs: i64);
}

/// Decorates a `CacheBackend`, broadcasting every locally-originated `set`
/// to the mesh before writing through.
pub struct MeshCache<B: CacheBackend> {
    backend: B,
    mesh: Arc<MeshServer>,
}

impl<B: CacheBackend> MeshCache<B> {
    pub fn new(backend: B, mesh: Arc<MeshServer>) -> Self {
        Self { backend, mesh }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.backend.get(key).await
    }

    /// `replicate = true` is the default path for locally-originated writes
    /// (the proxy storing a freshly fetched response); `replicate = false`
    /// is used only for inbound `SaveCacheEntry` handling, via `CacheSink`.
    pub async fn set(&self, key: &str, entry: CacheEntry, ttl_secs: i64, replicate: bool) {
        if replicate {
            self.mesh
                .replicate_cache_entry(key.to_string(), entry.clone(), ttl_secs);
        }

        self.backend.set(key, entry, ttl_secs).await;
    }

    pub async fn delete(&self, key: &str) {
        self.backend.delete(key).await;
    }
}

#[async_trait]
impl<B: CacheBackend> CacheSink for MeshCache<B> {
    async fn set_local(&self, key: &str, entry: CacheEntry, ttl_secs: i64) {
        self.backend.set(key, entry, ttl_secs).await;
    }
}
