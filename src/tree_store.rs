/// Durable storage for encoded pattern trees
///
/// This module provides the trait the miner persists through, plus two
/// implementations:
/// - `MemoryTreeStore`: in-process key/value store with per-key expiry
/// - `FileTreeStore`: one file per key under a directory, no expiry
///
/// A remote key/value backend only has to implement `get` and `set`.
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

// ============================================================================
// Tree Store Trait
// ============================================================================

/// Key/value contract for encoded trees.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Bytes stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`. A zero `ttl` means the entry never expires.
    /// Backends without expiry ignore `ttl`.
    async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Get the name/identifier of this store (for logging)
    fn name(&self) -> &str;
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct MemoryTreeStore {
    values: DashMap<String, StoredValue>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        self.values
            .remove_if(key, |_, v| v.expires_at.is_some_and(|deadline| now >= deadline));
        Ok(self.values.get(key).map(|v| v.bytes.clone()))
    }

    async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.values
            .insert(key.to_string(), StoredValue { bytes, expires_at });
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// File Store
// ============================================================================

pub struct FileTreeStore {
    dir: PathBuf,
}

impl FileTreeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding `key`. Characters outside `[A-Za-z0-9._-]` become `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.bin", file_name))
    }
}

#[async_trait]
impl TreeStore for FileTreeStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn set(&self, key: &str, bytes: Vec<u8>, _ttl: Duration) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        // Write then rename so readers never see a partial tree.
        let path = self.path_for(key);
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
