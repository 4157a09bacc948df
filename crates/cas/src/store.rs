//! Store backends.
//!
//! On disk:
//!
//! ```text
//! <dir>/blobs/<sha256>                  content, shared by every version
//! <dir>/meta/<sha256>.<version>.json    metadata, one per key
//! <dir>/refs/<sha256>.<version>         memo: input key -> output key
//! ```
//!
//! Files are written to a temp name and hard-linked into place, so a
//! concurrent writer either wins or observes `AlreadyExists`. Nothing is
//! ever rewritten; invalidation happens by bumping the parser version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use crate::CasError;
use crate::key::{CasKey, content_hash};

/// Metadata stored alongside a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasMetadata {
    /// Where the content came from (path, URL, tool call)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub content_type: String,

    /// Links discovered while parsing, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outlinks: Vec<String>,

    /// Filled in by the store
    #[serde(default)]
    pub size: u64,

    /// Filled in by the store
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CasMetadata {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            source: None,
            content_type: content_type.into(),
            outlinks: Vec::new(),
            size: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_outlinks(mut self, outlinks: Vec<String>) -> Self {
        self.outlinks = outlinks;
        self
    }
}

/// An immutable stored entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CasEntry {
    pub key: CasKey,
    pub blob: Vec<u8>,
    pub metadata: CasMetadata,
}

#[derive(Serialize, Deserialize)]
struct MetaRecord {
    key: String,
    #[serde(flatten)]
    metadata: CasMetadata,
}

/// A content-addressed store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `content`; returns its key. Idempotent: an existing key is
    /// returned as-is and its metadata is left untouched.
    async fn put(
        &self,
        content: &[u8],
        parser_version: &str,
        metadata: CasMetadata,
    ) -> Result<CasKey, CasError>;

    /// Fetch an entry. `None` is a cache miss, not an error.
    async fn get(&self, key: &CasKey) -> Result<Option<CasEntry>, CasError>;

    /// Record that `input` under `parser_version` produced `target`.
    async fn put_ref(
        &self,
        input: &[u8],
        parser_version: &str,
        target: &CasKey,
    ) -> Result<CasKey, CasError>;

    /// Look up the output previously recorded for `input`.
    async fn lookup(&self, input: &[u8], parser_version: &str) -> Result<Option<CasEntry>, CasError>;

    async fn contains(&self, key: &CasKey) -> Result<bool, CasError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Store `output` and link it from `input`.
    async fn memoize(
        &self,
        input: &[u8],
        parser_version: &str,
        output: &[u8],
        metadata: CasMetadata,
    ) -> Result<CasKey, CasError> {
        let key = self.put(output, parser_version, metadata).await?;
        self.put_ref(input, parser_version, &key).await?;
        Ok(key)
    }
}

// ── File store ────────────────────────────────────────────────────────────

/// A durable store rooted at a directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CasError> {
        let root = root.into();
        for sub in ["blobs", "meta", "refs", "tmp"] {
            let dir = root.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| CasError::io(&dir, e))?;
        }
        debug!(root = %root.display(), "CAS store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join("blobs").join(hash)
    }

    fn meta_path(&self, key: &CasKey) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", key.file_stem()))
    }

    fn ref_path(&self, key: &CasKey) -> PathBuf {
        self.root.join("refs").join(key.file_stem())
    }

    /// Write `bytes` at `dest` unless something is already there.
    async fn write_once(&self, dest: &Path, bytes: &[u8]) -> Result<(), CasError> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Ok(());
        }

        let tmp = self.root.join("tmp").join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CasError::io(&tmp, e))?;

        let linked = tokio::fs::hard_link(&tmp, dest).await;
        let result = match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => {
                // Filesystems without hard links: rename, still never over an existing file.
                warn!(error = %e, dest = %dest.display(), "hard link failed, falling back to rename");
                if tokio::fs::try_exists(dest).await.unwrap_or(false) {
                    Ok(())
                } else {
                    tokio::fs::rename(&tmp, dest)
                        .await
                        .map_err(|e| CasError::io(dest, e))
                }
            }
        };
        let _ = tokio::fs::remove_file(&tmp).await;
        result
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CasError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CasError::io(path, e)),
        }
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn put(
        &self,
        content: &[u8],
        parser_version: &str,
        mut metadata: CasMetadata,
    ) -> Result<CasKey, CasError> {
        let key = CasKey::derive(content, parser_version)?;
        let meta_path = self.meta_path(&key);
        if tokio::fs::try_exists(&meta_path).await.unwrap_or(false) {
            debug!(key = %key, "CAS hit on put");
            return Ok(key);
        }

        self.write_once(&self.blob_path(key.hash()), content).await?;

        metadata.size = content.len() as u64;
        metadata.created_at = Utc::now();
        let record = MetaRecord {
            key: key.to_string(),
            metadata,
        };
        let json = serde_json::to_vec_pretty(&record)?;
        self.write_once(&meta_path, &json).await?;

        debug!(key = %key, size = content.len(), "CAS put");
        Ok(key)
    }

    async fn get(&self, key: &CasKey) -> Result<Option<CasEntry>, CasError> {
        let Some(meta_bytes) = Self::read_optional(&self.meta_path(key)).await? else {
            return Ok(None);
        };
        let Some(blob) = Self::read_optional(&self.blob_path(key.hash())).await? else {
            warn!(key = %key, "metadata present but blob missing");
            return Ok(None);
        };
        if content_hash(&blob) != key.hash() {
            return Err(CasError::Corrupt(key.to_string()));
        }
        let record: MetaRecord = serde_json::from_slice(&meta_bytes)?;
        Ok(Some(CasEntry {
            key: key.clone(),
            blob,
            metadata: record.metadata,
        }))
    }

    async fn put_ref(
        &self,
        input: &[u8],
        parser_version: &str,
        target: &CasKey,
    ) -> Result<CasKey, CasError> {
        let ref_key = CasKey::derive(input, parser_version)?;
        self.write_once(&self.ref_path(&ref_key), target.to_string().as_bytes())
            .await?;
        Ok(ref_key)
    }

    async fn lookup(&self, input: &[u8], parser_version: &str) -> Result<Option<CasEntry>, CasError> {
        let ref_key = CasKey::derive(input, parser_version)?;
        let Some(bytes) = Self::read_optional(&self.ref_path(&ref_key)).await? else {
            return Ok(None);
        };
        let target: CasKey = String::from_utf8_lossy(&bytes).trim().parse()?;
        self.get(&target).await
    }
}

// ── Memory store ──────────────────────────────────────────────────────────

/// An in-process store with the same semantics, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CasKey, CasEntry>>,
    refs: RwLock<HashMap<CasKey, CasKey>>,
}

impl MemoryStore {
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
impl ContentStore for MemoryStore {
    async fn put(
        &self,
        content: &[u8],
        parser_version: &str,
        mut metadata: CasMetadata,
    ) -> Result<CasKey, CasError> {
        let key = CasKey::derive(content, parser_version)?;
        let mut entries = self.entries.write().await;
        entries.entry(key.clone()).or_insert_with(|| {
            metadata.size = content.len() as u64;
            CasEntry {
                key: key.clone(),
                blob: content.to_vec(),
                metadata,
            }
        });
        Ok(key)
    }

    async fn get(&self, key: &CasKey) -> Result<Option<CasEntry>, CasError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put_ref(
        &self,
        input: &[u8],
        parser_version: &str,
        target: &CasKey,
    ) -> Result<CasKey, CasError> {
        let ref_key = CasKey::derive(input, parser_version)?;
        self.refs
            .write()
            .await
            .entry(ref_key.clone())
            .or_insert_with(|| target.clone());
        Ok(ref_key)
    }

    async fn lookup(&self, input: &[u8], parser_version: &str) -> Result<Option<CasEntry>, CasError> {
        let ref_key = CasKey::derive(input, parser_version)?;
        let target = self.refs.read().await.get(&ref_key).cloned();
        match target {
            Some(target) => self.get(&target).await,
            None => Ok(None),
        }
    }
}
