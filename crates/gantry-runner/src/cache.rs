//! Cache key generation and the in-memory cache provider.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::Result;
use gantry_core::ports::{CacheEntry, CacheProvider, CacheRestore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Generate a cache key from a template and file contents, e.g.
/// `cargo-windows-latest-<hash(Cargo.lock)>`. Unreadable files simply
/// don't contribute to the hash.
pub fn generate_key(template: &str, file_paths: &[&Path]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    for path in file_paths {
        if let Ok(contents) = std::fs::read(path) {
            hasher.update(&contents);
        }
    }
    let hash = hasher.finalize();
    format!("{}-{}", template, hex::encode(&hash[..8]))
}

/// In-memory cache provider. Saves to the same key resolve by
/// last-writer-wins, matching the weakest guarantee the dependency cache
/// is required to give.
#[derive(Debug, Default)]
pub struct MemoryCacheProvider {
    entries: RwLock<HashMap<String, CacheRestore>>,
}

impl MemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheRestore>> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key) {
            return Ok(Some(entry.clone()));
        }
        // Prefix fallback: most recently saved entry under each restore
        // key, in declaration order.
        for prefix in restore_keys {
            let mut candidates: Vec<&CacheRestore> = entries
                .values()
                .filter(|e| e.entry.key.starts_with(prefix.as_str()))
                .collect();
            candidates.sort_by_key(|e| e.entry.created_at);
            if let Some(entry) = candidates.last() {
                return Ok(Some((*entry).clone()));
            }
        }
        Ok(None)
    }

    async fn save(&self, key: &str, payload: Vec<u8>) -> Result<CacheEntry> {
        let meta = CacheEntry {
            key: key.to_string(),
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
        };
        self.entries.write().await.insert(
            key.to_string(),
            CacheRestore {
                entry: meta.clone(),
                payload,
            },
        );
        Ok(meta)
    }
}
