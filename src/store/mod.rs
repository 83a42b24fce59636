//! Cache store capability
//!
//! Named, persistent key→response containers. The agent uses exactly three:
//!
//! | Name | Lifetime | Contents |
//! |------|----------|----------|
//! | `content` | durable | every entry served to clients |
//! | `staging` | install → activate | freshly fetched core shell |
//! | `manifest` | durable | one entry, key `"manifest"`, the last activated manifest |
//!
//! Container keys are absolute request URLs, except the literal
//! [`MANIFEST_KEY`] in the `manifest` container.

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::{MemoryStorage, StoreOp};

use crate::error::AgentResult;
use crate::network::Response;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Key of the persisted manifest inside the `manifest` container
pub const MANIFEST_KEY: &str = "manifest";

/// The containers this agent owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheName {
    Content,
    Staging,
    Manifest,
}

impl CacheName {
    /// Storage name of the container
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Staging => "staging",
            Self::Manifest => "manifest",
        }
    }

    /// All containers, in wipe order
    pub fn all() -> [Self; 3] {
        [Self::Content, Self::Staging, Self::Manifest]
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named container
#[async_trait]
pub trait Container: Send + Sync {
    /// Which container this handle refers to
    fn name(&self) -> CacheName;

    /// Look up the entry stored under `key`
    async fn match_entry(&self, key: &str) -> AgentResult<Option<Response>>;

    /// Store `response` under `key`, replacing any previous entry
    async fn put(&self, key: &str, response: Response) -> AgentResult<()>;

    /// Remove the entry under `key`; returns whether it existed
    async fn delete(&self, key: &str) -> AgentResult<bool>;

    /// Keys currently stored, sorted
    async fn keys(&self) -> AgentResult<Vec<String>>;
}

/// The set of named containers
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a container, creating it if absent
    async fn open(&self, name: CacheName) -> AgentResult<Arc<dyn Container>>;

    /// Delete a container and all its entries; returns whether it existed
    async fn delete(&self, name: CacheName) -> AgentResult<bool>;

    /// Whether a container currently exists
    async fn has(&self, name: CacheName) -> AgentResult<bool>;
}
