//! In-process cache storage
//!
//! Containers live in memory and vanish with the process. Faults can be
//! injected per container and operation to exercise recovery paths.

use super::{CacheName, CacheStorage, Container};
use crate::error::{AgentError, AgentResult};
use crate::network::Response;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Container operation, for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Match,
    Put,
    Delete,
    Keys,
}

type Entries = Arc<RwLock<BTreeMap<String, Response>>>;
type Faults = Arc<RwLock<HashSet<(CacheName, StoreOp)>>>;

/// Cache storage held entirely in memory
#[derive(Default)]
pub struct MemoryStorage {
    containers: RwLock<HashMap<CacheName, Entries>>,
    faults: Faults,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` on container `name` fail until faults are cleared
    pub async fn fail_on(&self, name: CacheName, op: StoreOp) {
        self.faults.write().await.insert((name, op));
    }

    /// Remove all injected faults
    pub async fn clear_faults(&self) {
        self.faults.write().await.clear();
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: CacheName) -> AgentResult<Arc<dyn Container>> {
        let mut containers = self.containers.write().await;
        let entries = containers.entry(name).or_default().clone();
        Ok(Arc::new(MemoryContainer {
            name,
            entries,
            faults: self.faults.clone(),
        }))
    }

    async fn delete(&self, name: CacheName) -> AgentResult<bool> {
        Ok(self.containers.write().await.remove(&name).is_some())
    }

    async fn has(&self, name: CacheName) -> AgentResult<bool> {
        Ok(self.containers.read().await.contains_key(&name))
    }
}

/// Handle to one in-memory container
///
/// A handle keeps its entries alive after the container is deleted from
/// storage, but reopening the name yields a fresh, empty container.
struct MemoryContainer {
    name: CacheName,
    entries: Entries,
    faults: Faults,
}

impl MemoryContainer {
    async fn check(&self, op: StoreOp) -> AgentResult<()> {
        if self.faults.read().await.contains(&(self.name, op)) {
            return Err(AgentError::store(
                self.name.as_str(),
                format!("injected {:?} failure", op),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Container for MemoryContainer {
    fn name(&self) -> CacheName {
        self.name
    }

    async fn match_entry(&self, key: &str) -> AgentResult<Option<Response>> {
        self.check(StoreOp::Match).await?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, response: Response) -> AgentResult<()> {
        self.check(StoreOp::Put).await?;
        self.entries.write().await.insert(key.to_string(), response);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AgentResult<bool> {
        self.check(StoreOp::Delete).await?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> AgentResult<Vec<String>> {
        self.check(StoreOp::Keys).await?;
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
