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

// knitmesh - cache backend contract (C4's dependency)
//
// The core only ever speaks through this trait: get/set/delete plus a TTL.
// spec.md treats the concrete backend (in-memory, LRU, disk) as an external
// collaborator; `MemoryCacheBackend` is the one reference implementation
// this crate ships so the mesh and proxy layers have something real to run
// against.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// A cached HTTP response: body, status line, and response headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
    pub status_line: String,
    pub headers: Vec<(String, String)>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: &str, entry: CacheEntry, ttl_secs: i64);

    async fn delete(&self, key: &str);
}

struct Slot {
    entry: CacheEntry,
    inserted_at: Instant,
    ttl: Duration,
}

impl Slot {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// In-process reference backend. Expiry is checked lazily on `get`; entries
/// past their TTL are treated as a miss and evicted at that point.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, Slot>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(slot) if !slot.is_expired() => return Some(slot.entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it under a write lock before reporting a miss.
        let mut entries = self.entries.write().await;
        entries.remove(key);
        None
    }

    async fn set(&self, key: &str, entry: CacheEntry, ttl_secs: i64) {
        if ttl_secs <= 0 {
            return;
        }

        let slot = Slot {
            entry,
            inserted_at: Instant::now(),
            ttl: Duration::from_secs(ttl_secs as u64),
        };

        self.entries.write().await.insert(key.to_string(), slot);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str) -> CacheEntry {
        CacheEntry {
            body: body.as_bytes().to_vec(),
            status_line: "200 OK".to_string(),
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let backend = MemoryCacheBackend::new();
        backend.set("k", entry("hello"), 60).await;

        let got = backend.get("k").await.unwrap();
        assert_eq!(got.body, b"hello");
    }

    #[tokio::test]
    async fn non_positive_ttl_is_never_stored() {
        let backend = MemoryCacheBackend::new();
        backend.set("k", entry("hello"), 0).await;
        backend.set("k2", entry("hello"), -1).await;

        assert!(backend.get("k").await.is_none());
        assert!(backend.get("k2").await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let backend = MemoryCacheBackend::new();
        backend.set("k", entry("hello"), 60).await;
        backend.delete("k").await;

        assert!(backend.get("k").await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_a_miss() {
        let backend = MemoryCacheBackend::new();
        backend.set("k", entry("hello"), 1).await;

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(backend.get("k").await.is_none());
    }
}
