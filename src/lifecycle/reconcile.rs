//! Activation-time cache reconciliation
//!
//! Merges the staged core shell into the durable `content` container while
//! pruning entries the new manifest no longer vouches for. Reuse is decided by
//! fingerprint comparison against the previously persisted manifest: an
//! entry survives only if its key is still declared with an unchanged
//! fingerprint. Cached bytes are never re-hashed.
//!
//! # Steps
//!
//! | # | Step | Cold path | Warm path |
//! |---|------|-----------|-----------|
//! | 1 | open containers | ✓ | ✓ |
//! | 2 | read prior manifest | absent | present |
//! | 3/4 | reset or prune `content` | reset | prune |
//! | 5 | merge `staging` into `content` | ✓ | ✓ |
//! | 6 | delete `staging` | ✓ | ✓ |
//! | 7 | persist current manifest | ✓ | ✓ |
//! | 8 | claim clients | ✓ | ✓ |
//!
//! Any failure leaves the cache state unknown, so all three containers are
//! deleted and the agent falls back to the network entirely.

use crate::error::{AgentError, AgentResult};
use crate::lifecycle::host::Host;
use crate::manifest::{Origin, ResourceManifest};
use crate::network::Response;
use crate::store::{CacheName, CacheStorage, Container, MANIFEST_KEY};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info};

/// One step of the reconciliation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStep {
    OpenCaches,
    ReadPriorManifest,
    ResetContent,
    PruneContent,
    MergeStaged,
    DeleteStaging,
    PersistManifest,
    ClaimClients,
}

impl ReconcileStep {
    /// Position in the sequence; reset and prune are alternatives
    fn position(&self) -> u8 {
        match self {
            Self::OpenCaches => 1,
            Self::ReadPriorManifest => 2,
            Self::ResetContent | Self::PruneContent => 3,
            Self::MergeStaged => 5,
            Self::DeleteStaging => 6,
            Self::PersistManifest => 7,
            Self::ClaimClients => 8,
        }
    }
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenCaches => "open caches",
            Self::ReadPriorManifest => "read prior manifest",
            Self::ResetContent => "reset content",
            Self::PruneContent => "prune content",
            Self::MergeStaged => "merge staged entries",
            Self::DeleteStaging => "delete staging",
            Self::PersistManifest => "persist manifest",
            Self::ClaimClients => "claim clients",
        };
        f.write_str(name)
    }
}

/// Which branch reconciliation took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePath {
    /// No prior manifest: `content` rebuilt from staging alone
    Cold,
    /// Prior manifest found: unchanged entries reused
    Warm,
}

/// What a successful reconciliation did
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub path: ReconcilePath,
    /// Entries kept from the previous `content` and not overwritten
    pub retained: Vec<String>,
    /// Entries removed because the manifest no longer vouches for them
    pub pruned: Vec<String>,
    /// Entries copied from `staging`
    pub merged: Vec<String>,
    /// Steps executed, in order
    pub steps: Vec<ReconcileStep>,
}

impl ReconcileReport {
    fn new(path: ReconcilePath) -> Self {
        Self {
            path,
            retained: vec![],
            pruned: vec![],
            merged: vec![],
            steps: vec![],
        }
    }
}

/// Result of an activation
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// All steps completed
    Completed(ReconcileReport),
    /// A step failed; every container was deleted
    Wiped {
        failed_step: Option<ReconcileStep>,
        reason: String,
    },
}

impl ReconcileOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Wiped { .. } => None,
        }
    }
}

/// Ordered step log; entering a step out of order is an error
#[derive(Debug, Default)]
struct StepLog {
    steps: Vec<ReconcileStep>,
}

impl StepLog {
    fn enter(&mut self, step: ReconcileStep) -> AgentResult<()> {
        if let Some(last) = self.steps.last() {
            if step.position() <= last.position() {
                return Err(AgentError::Internal(format!(
                    "reconcile step '{}' entered after '{}'",
                    step, last
                )));
            }
        }
        debug!("Reconcile step {}: {}", step.position(), step);
        self.steps.push(step);
        Ok(())
    }

    fn current(&self) -> Option<ReconcileStep> {
        self.steps.last().copied()
    }
}

/// Read the manifest persisted by the last successful activation
pub async fn read_persisted_manifest(
    manifest_cache: &dyn Container,
) -> AgentResult<Option<ResourceManifest>> {
    let Some(entry) = manifest_cache.match_entry(MANIFEST_KEY).await? else {
        return Ok(None);
    };
    let manifest = serde_json::from_slice(&entry.body).map_err(|e| AgentError::CorruptEntry {
        cache: CacheName::Manifest.to_string(),
        key: MANIFEST_KEY.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(manifest))
}

/// Runs the reconciliation sequence against explicit collaborators
pub struct Reconciler<'a> {
    storage: &'a dyn CacheStorage,
    host: &'a dyn Host,
    origin: &'a Origin,
    manifest: &'a ResourceManifest,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        storage: &'a dyn CacheStorage,
        host: &'a dyn Host,
        origin: &'a Origin,
        manifest: &'a ResourceManifest,
    ) -> Self {
        Self {
            storage,
            host,
            origin,
            manifest,
        }
    }

    /// Reconcile, wiping every container on failure
    pub async fn run(&self) -> ReconcileOutcome {
        let mut log = StepLog::default();

        match self.reconcile(&mut log).await {
            Ok(mut report) => {
                report.steps = log.steps;
                info!(
                    "Reconciled ({:?}): {} retained, {} pruned, {} merged",
                    report.path,
                    report.retained.len(),
                    report.pruned.len(),
                    report.merged.len()
                );
                ReconcileOutcome::Completed(report)
            }
            Err(e) => {
                let failed_step = log.current();
                error!(
                    "Failed to reconcile caches at step {:?}: {}; wiping all caches",
                    failed_step, e
                );
                self.wipe().await;
                ReconcileOutcome::Wiped {
                    failed_step,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn reconcile(&self, log: &mut StepLog) -> AgentResult<ReconcileReport> {
        log.enter(ReconcileStep::OpenCaches)?;
        let mut content = self.storage.open(CacheName::Content).await?;
        let staging = self.storage.open(CacheName::Staging).await?;
        let manifest_cache = self.storage.open(CacheName::Manifest).await?;

        log.enter(ReconcileStep::ReadPriorManifest)?;
        let prior = read_persisted_manifest(manifest_cache.as_ref()).await?;

        let mut report = match prior {
            None => {
                log.enter(ReconcileStep::ResetContent)?;
                self.storage.delete(CacheName::Content).await?;
                content = self.storage.open(CacheName::Content).await?;
                ReconcileReport::new(ReconcilePath::Cold)
            }
            Some(prior) => {
                log.enter(ReconcileStep::PruneContent)?;
                let mut report = ReconcileReport::new(ReconcilePath::Warm);
                self.prune(content.as_ref(), &prior, &mut report).await?;
                report
            }
        };

        log.enter(ReconcileStep::MergeStaged)?;
        report.merged = copy_entries(staging.as_ref(), content.as_ref()).await?;
        let merged: HashSet<&String> = report.merged.iter().collect();
        report.retained.retain(|url| !merged.contains(url));

        log.enter(ReconcileStep::DeleteStaging)?;
        self.storage.delete(CacheName::Staging).await?;

        log.enter(ReconcileStep::PersistManifest)?;
        let snapshot = Response::json(self.manifest.to_json()?);
        manifest_cache.put(MANIFEST_KEY, snapshot).await?;

        log.enter(ReconcileStep::ClaimClients)?;
        self.host.claim_clients().await?;

        Ok(report)
    }

    async fn prune(
        &self,
        content: &dyn Container,
        prior: &ResourceManifest,
        report: &mut ReconcileReport,
    ) -> AgentResult<()> {
        for url in content.keys().await? {
            let reusable = self
                .origin
                .logical_key(&url)
                .is_some_and(|key| self.manifest.retains(prior, &key));

            if reusable {
                report.retained.push(url);
            } else {
                content.delete(&url).await?;
                debug!("Pruned {}", url);
                report.pruned.push(url);
            }
        }
        Ok(())
    }

    async fn wipe(&self) {
        for name in CacheName::all() {
            if let Err(e) = self.storage.delete(name).await {
                error!("Failed to delete {} cache during recovery: {}", name, e);
            }
        }
    }
}

/// Copy every entry of `from` into `to`, overwriting same-key entries
async fn copy_entries(from: &dyn Container, to: &dyn Container) -> AgentResult<Vec<String>> {
    let mut copied = vec![];
    for url in from.keys().await? {
        let response = from
            .match_entry(&url)
            .await?
            .ok_or_else(|| AgentError::CorruptEntry {
                cache: from.name().to_string(),
                key: url.clone(),
                reason: "listed but not found".to_string(),
            })?;
        to.put(&url, response).await?;
        copied.push(url);
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LocalHost;
    use crate::store::{FsStorage, MemoryStorage, StoreOp};
    use crate::testing::{manifest, url, ORIGIN};
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn put(storage: &dyn CacheStorage, name: CacheName, key: &str, body: &str) {
        let cache = storage.open(name).await.unwrap();
        cache.put(&url(key), Response::new(200, body)).await.unwrap();
    }

    async fn persist(storage: &dyn CacheStorage, manifest: &ResourceManifest) {
        let cache = storage.open(CacheName::Manifest).await.unwrap();
        cache
            .put(MANIFEST_KEY, Response::json(manifest.to_json().unwrap()))
            .await
            .unwrap();
    }

    async fn bodies(storage: &dyn CacheStorage) -> BTreeMap<String, String> {
        let content = storage.open(CacheName::Content).await.unwrap();
        let mut bodies = BTreeMap::new();
        for key in content.keys().await.unwrap() {
            let entry = content.match_entry(&key).await.unwrap().unwrap();
            bodies.insert(key, String::from_utf8(entry.body).unwrap());
        }
        bodies
    }

    async fn reconcile(
        storage: &dyn CacheStorage,
        host: &LocalHost,
        current: &ResourceManifest,
    ) -> ReconcileOutcome {
        let origin = Origin::parse(ORIGIN).unwrap();
        Reconciler::new(storage, host, &origin, current).run().await
    }

    #[tokio::test]
    async fn cold_start_rebuilds_content_from_staging() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let current = manifest(&[("/", "h0"), ("index.html", "h1"), ("main.dart.js", "h2")]);
        put(&storage, CacheName::Content, "unversioned.js", "stale").await;
        put(&storage, CacheName::Staging, "index.html", "<html>").await;

        let outcome = reconcile(&storage, &host, &current).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.path, ReconcilePath::Cold);
        assert_eq!(
            report.steps,
            vec![
                ReconcileStep::OpenCaches,
                ReconcileStep::ReadPriorManifest,
                ReconcileStep::ResetContent,
                ReconcileStep::MergeStaged,
                ReconcileStep::DeleteStaging,
                ReconcileStep::PersistManifest,
                ReconcileStep::ClaimClients,
            ]
        );

        let content = bodies(&storage).await;
        assert_eq!(content.len(), 1);
        assert_eq!(content[&url("index.html")], "<html>");
        assert!(!storage.has(CacheName::Staging).await.unwrap());

        let manifest_cache = storage.open(CacheName::Manifest).await.unwrap();
        let persisted = read_persisted_manifest(manifest_cache.as_ref()).await.unwrap();
        assert_eq!(persisted, Some(current));
        assert_eq!(host.claims(), 1);
    }

    #[tokio::test]
    async fn warm_upgrade_reuses_unchanged_entries() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        persist(&storage, &manifest(&[("a", "h1"), ("b", "h2")])).await;
        put(&storage, CacheName::Content, "a", "a-v1").await;
        put(&storage, CacheName::Content, "b", "b-v1").await;
        put(&storage, CacheName::Staging, "b", "b-v2").await;
        put(&storage, CacheName::Staging, "c", "c-v1").await;
        let current = manifest(&[("a", "h1"), ("b", "h3"), ("c", "h4")]);

        let outcome = reconcile(&storage, &host, &current).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.path, ReconcilePath::Warm);
        assert_eq!(report.retained, vec![url("a")]);
        assert_eq!(report.pruned, vec![url("b")]);
        assert_eq!(report.merged, vec![url("b"), url("c")]);
        assert!(report.steps.contains(&ReconcileStep::PruneContent));

        let content = bodies(&storage).await;
        assert_eq!(content.len(), 3);
        assert_eq!(content[&url("a")], "a-v1");
        assert_eq!(content[&url("b")], "b-v2");
        assert_eq!(content[&url("c")], "c-v1");
    }

    #[tokio::test]
    async fn staged_entries_overwrite_survivors() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let current = manifest(&[("/", "h0"), ("index.html", "h1")]);
        persist(&storage, &current).await;
        put(&storage, CacheName::Content, "index.html", "cached").await;
        put(&storage, CacheName::Staging, "index.html", "fresh").await;

        let outcome = reconcile(&storage, &host, &current).await;

        let report = outcome.report().unwrap();
        assert!(report.retained.is_empty());
        assert!(report.pruned.is_empty());
        assert_eq!(bodies(&storage).await[&url("index.html")], "fresh");
    }

    #[tokio::test]
    async fn removed_and_foreign_entries_are_pruned() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let prior = manifest(&[("/", "h0"), ("old.js", "h1"), ("keep.js", "h2")]);
        persist(&storage, &prior).await;
        put(&storage, CacheName::Content, "old.js", "old").await;
        put(&storage, CacheName::Content, "keep.js", "keep").await;
        put(&storage, CacheName::Content, "/", "root").await;
        let foreign = storage.open(CacheName::Content).await.unwrap();
        foreign
            .put("https://cdn.test/lib.js", Response::new(200, "cdn"))
            .await
            .unwrap();
        let current = manifest(&[("/", "h0"), ("keep.js", "h2")]);

        let outcome = reconcile(&storage, &host, &current).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.retained.len(), 2);
        assert!(report.pruned.contains(&url("old.js")));
        assert!(report.pruned.contains(&"https://cdn.test/lib.js".to_string()));

        let content = bodies(&storage).await;
        assert_eq!(content.len(), 2);
        assert_eq!(content[&url("/")], "root");
    }

    #[tokio::test]
    async fn cache_busted_entries_follow_their_logical_key() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let prior = manifest(&[("main.dart.js", "h1")]);
        persist(&storage, &prior).await;
        put(&storage, CacheName::Content, "main.dart.js?v=7", "main").await;

        let unchanged = reconcile(&storage, &host, &prior).await;
        assert_eq!(unchanged.report().unwrap().retained, vec![url("main.dart.js?v=7")]);

        let changed = manifest(&[("main.dart.js", "h2")]);
        let outcome = reconcile(&storage, &host, &changed).await;
        assert_eq!(outcome.report().unwrap().pruned, vec![url("main.dart.js?v=7")]);
    }

    #[tokio::test]
    async fn survival_matches_fingerprint_rule() {
        let prior = manifest(&[("a", "1"), ("b", "1"), ("c", "1"), ("d", "1")]);
        let current = manifest(&[("a", "1"), ("b", "2"), ("d", "1"), ("e", "1")]);
        let staged = ["d"];

        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        persist(&storage, &prior).await;
        for key in ["a", "b", "c", "d"] {
            put(&storage, CacheName::Content, key, "old").await;
        }
        for key in staged {
            put(&storage, CacheName::Staging, key, "new").await;
        }

        reconcile(&storage, &host, &current).await;
        let content = bodies(&storage).await;

        for key in ["a", "b", "c", "d", "e"] {
            let expected_old = current.retains(&prior, key) && !staged.contains(&key);
            let is_old = content.get(&url(key)).map(String::as_str) == Some("old");
            assert_eq!(is_old, expected_old, "key {key}");
        }
    }

    #[tokio::test]
    async fn idempotent_without_staging() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let current = manifest(&[("/", "h0"), ("a", "h1"), ("b", "h2")]);
        persist(&storage, &current).await;
        put(&storage, CacheName::Content, "a", "a").await;
        put(&storage, CacheName::Content, "b", "b").await;
        let before = bodies(&storage).await;

        let first = reconcile(&storage, &host, &current).await;
        let second = reconcile(&storage, &host, &current).await;

        assert!(first.report().unwrap().pruned.is_empty());
        assert!(second.report().unwrap().pruned.is_empty());
        assert_eq!(bodies(&storage).await, before);
    }

    #[tokio::test]
    async fn persisted_manifest_roundtrip_prunes_nothing() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let current = manifest(&[("/", "h0"), ("index.html", "h1"), ("a.js", "h2")]);
        put(&storage, CacheName::Staging, "index.html", "<html>").await;
        reconcile(&storage, &host, &current).await;

        put(&storage, CacheName::Content, "a.js", "lazy").await;
        let outcome = reconcile(&storage, &host, &current).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.path, ReconcilePath::Warm);
        assert!(report.pruned.is_empty());
        assert_eq!(report.retained.len(), 2);
    }

    #[tokio::test]
    async fn failure_wipes_every_container() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let current = manifest(&[("/", "h0"), ("a", "h1"), ("b", "h2")]);
        persist(&storage, &manifest(&[("a", "h1"), ("b", "h0")])).await;
        put(&storage, CacheName::Content, "a", "a").await;
        put(&storage, CacheName::Content, "b", "b").await;
        put(&storage, CacheName::Staging, "a", "a2").await;
        storage.fail_on(CacheName::Content, StoreOp::Delete).await;

        let outcome = reconcile(&storage, &host, &current).await;

        match outcome {
            ReconcileOutcome::Wiped {
                failed_step,
                reason,
            } => {
                assert_eq!(failed_step, Some(ReconcileStep::PruneContent));
                assert!(reason.contains("injected"));
            }
            other => panic!("expected wipe, got {other:?}"),
        }
        for name in CacheName::all() {
            assert!(!storage.has(name).await.unwrap(), "{name} survived");
        }
        assert_eq!(host.claims(), 0);
    }

    #[tokio::test]
    async fn corrupt_prior_manifest_wipes() {
        let storage = MemoryStorage::new();
        let host = LocalHost::new();
        let manifest_cache = storage.open(CacheName::Manifest).await.unwrap();
        manifest_cache
            .put(MANIFEST_KEY, Response::json("{not json"))
            .await
            .unwrap();
        put(&storage, CacheName::Content, "a", "a").await;

        let outcome = reconcile(&storage, &host, &manifest(&[("a", "h1"), ("b", "h2")])).await;

        assert!(matches!(
            outcome,
            ReconcileOutcome::Wiped {
                failed_step: Some(ReconcileStep::ReadPriorManifest),
                ..
            }
        ));
        assert!(!storage.has(CacheName::Content).await.unwrap());
    }

    #[test]
    fn step_log_rejects_reordering() {
        let mut log = StepLog::default();
        log.enter(ReconcileStep::OpenCaches).unwrap();
        log.enter(ReconcileStep::ReadPriorManifest).unwrap();
        log.enter(ReconcileStep::PruneContent).unwrap();
        assert!(log.enter(ReconcileStep::ResetContent).is_err());
        log.enter(ReconcileStep::MergeStaged).unwrap();
        assert!(log.enter(ReconcileStep::PruneContent).is_err());
        assert_eq!(log.current(), Some(ReconcileStep::MergeStaged));
    }

    #[tokio::test]
    async fn warm_upgrade_on_disk() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let host = LocalHost::new();
        persist(&storage, &manifest(&[("a", "h1"), ("b", "h2")])).await;
        put(&storage, CacheName::Content, "a", "a-v1").await;
        put(&storage, CacheName::Content, "b", "b-v1").await;
        put(&storage, CacheName::Staging, "b", "b-v2").await;
        put(&storage, CacheName::Staging, "c", "c-v1").await;
        let current = manifest(&[("a", "h1"), ("b", "h3"), ("c", "h4")]);

        let outcome = reconcile(&storage, &host, &current).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.path, ReconcilePath::Warm);
        assert_eq!(report.retained, vec![url("a")]);
        assert_eq!(report.pruned, vec![url("b")]);
        assert_eq!(report.merged, vec![url("b"), url("c")]);
        assert!(!dir.path().join("staging").exists());

        let reopened = FsStorage::new(dir.path());
        let content = bodies(&reopened).await;
        assert_eq!(content.len(), 3);
        assert_eq!(content[&url("a")], "a-v1");
        assert_eq!(content[&url("b")], "b-v2");

        let manifest_cache = reopened.open(CacheName::Manifest).await.unwrap();
        let persisted = read_persisted_manifest(manifest_cache.as_ref()).await.unwrap();
        assert_eq!(persisted, Some(current));
    }

    #[tokio::test]
    async fn unreadable_entry_on_disk_wipes() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let host = LocalHost::new();
        persist(&storage, &manifest(&[("a", "h1"), ("b", "h2")])).await;
        put(&storage, CacheName::Content, "a", "a-v1").await;
        put(&storage, CacheName::Content, "b", "b-v1").await;
        let stem = hex::encode(Sha256::digest(url("b").as_bytes()));
        std::fs::write(dir.path().join("content").join(format!("{stem}.json")), "{trunc").unwrap();
        let current = manifest(&[("a", "h1"), ("b", "h3")]);

        let outcome = reconcile(&storage, &host, &current).await;

        match outcome {
            ReconcileOutcome::Wiped {
                failed_step,
                reason,
            } => {
                assert_eq!(failed_step, Some(ReconcileStep::PruneContent));
                assert!(reason.contains("Corrupt cache entry"));
            }
            other => panic!("expected wipe, got {other:?}"),
        }
        for name in CacheName::all() {
            assert!(!storage.has(name).await.unwrap());
        }
        assert!(!dir.path().join("content").exists());
        assert_eq!(host.claims(), 0);
    }
}
