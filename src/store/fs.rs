//! Filesystem cache storage
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<container>/<sha256(key)>.json   entry metadata (key, status, headers)
//! <root>/<container>/<sha256(key)>.body   response body
//! ```
//!
//! The body is written before the metadata, each through a temp file and a
//! rename, so an entry is visible only once both parts are complete.

use super::{CacheName, CacheStorage, Container};
use crate::error::{AgentError, AgentResult};
use crate::network::Response;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";

/// Distinguishes temp files of concurrent writes to the same key
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Metadata stored next to each body
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

/// Durable cache storage rooted at a directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, name: CacheName) -> PathBuf {
        self.root.join(name.as_str())
    }
}

#[async_trait]
impl CacheStorage for FsStorage {
    async fn open(&self, name: CacheName) -> AgentResult<Arc<dyn Container>> {
        let dir = self.container_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AgentError::io(format!("creating cache directory {}", dir.display()), e))?;
        Ok(Arc::new(FsContainer { name, dir }))
    }

    async fn delete(&self, name: CacheName) -> AgentResult<bool> {
        let dir = self.container_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Deleted cache container {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::io(
                format!("deleting cache directory {}", dir.display()),
                e,
            )),
        }
    }

    async fn has(&self, name: CacheName) -> AgentResult<bool> {
        Ok(self.container_dir(name).is_dir())
    }
}

/// Handle to one container directory
struct FsContainer {
    name: CacheName,
    dir: PathBuf,
}

impl FsContainer {
    fn stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let stem = Self::stem(key);
        (
            self.dir.join(format!("{}.{}", stem, META_EXT)),
            self.dir.join(format!("{}.{}", stem, BODY_EXT)),
        )
    }

    fn corrupt(&self, key: &str, reason: impl Into<String>) -> AgentError {
        AgentError::CorruptEntry {
            cache: self.name.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> AgentResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents)
            .await
            .map_err(|e| AgentError::io(format!("writing {}", tmp.display()), e))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(AgentError::io(format!("renaming {}", tmp.display()), e));
        }
        Ok(())
    }

    /// Read entry metadata; `label` names the entry in corruption errors
    async fn read_meta(&self, path: &Path, label: &str) -> AgentResult<Option<EntryMeta>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| self.corrupt(label, format!("metadata unreadable: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::io(format!("reading {}", path.display()), e)),
        }
    }
}

#[async_trait]
impl Container for FsContainer {
    fn name(&self) -> CacheName {
        self.name
    }

    async fn match_entry(&self, key: &str) -> AgentResult<Option<Response>> {
        let (meta_path, body_path) = self.paths(key);
        let Some(meta) = self.read_meta(&meta_path, key).await? else {
            return Ok(None);
        };
        if meta.key != key {
            return Err(self.corrupt(key, format!("metadata names '{}'", meta.key)));
        }

        let body = fs::read(&body_path)
            .await
            .map_err(|e| self.corrupt(key, format!("body unreadable: {}", e)))?;

        Ok(Some(Response {
            status: meta.status,
            headers: meta.headers,
            body,
        }))
    }

    async fn put(&self, key: &str, response: Response) -> AgentResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::io(format!("creating {}", self.dir.display()), e))?;

        let (meta_path, body_path) = self.paths(key);
        let meta = EntryMeta {
            key: key.to_string(),
            status: response.status,
            headers: response.headers,
            stored_at: Utc::now(),
        };

        Self::write_atomic(&body_path, &response.body).await?;
        Self::write_atomic(&meta_path, &serde_json::to_vec(&meta)?).await?;
        debug!("Stored {} in {} ({} bytes)", key, self.name, response.body.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AgentResult<bool> {
        let (meta_path, body_path) = self.paths(key);
        let existed = match fs::remove_file(&meta_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(AgentError::io(format!("deleting {}", meta_path.display()), e));
            }
        };
        if let Err(e) = fs::remove_file(&body_path).await {
            if e.kind() != ErrorKind::NotFound {
                return Err(AgentError::io(format!("deleting {}", body_path.display()), e));
            }
        }
        Ok(existed)
    }

    async fn keys(&self) -> AgentResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(AgentError::io(format!("reading {}", self.dir.display()), e));
            }
        };

        let mut keys = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::io("reading cache entry", e))?
        {
            // An entry that cannot be named cannot be pruned either
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == META_EXT) {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if let Some(meta) = self.read_meta(&path, &stem).await? {
                    keys.push(meta.key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
