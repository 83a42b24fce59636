//! Lifecycle audit trail
//!
//! Each lifecycle event becomes one JSON line in `audit.log` inside the
//! storage directory:
//!
//! ```text
//! {"timestamp":"…","event":"agent.activated","data":{"manifest_version":"…","path":"warm",…}}
//! ```
//!
//! On by default; disable with `general.audit_log = false`.

use crate::config::Config;
use crate::lifecycle::{ReconcileOutcome, ReconcilePath, ReconcileStep};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// File name of the audit log inside the storage directory
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// Events recorded in the audit trail
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AuditEvent {
    Installed {
        manifest_version: String,
        staged: Vec<String>,
    },
    InstallFailed {
        manifest_version: String,
        reason: String,
    },
    Activated {
        manifest_version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<ReconcilePath>,
        retained: usize,
        pruned: usize,
        merged: usize,
        wiped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_step: Option<ReconcileStep>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Message {
        command: String,
        result: serde_json::Value,
    },
}

impl AuditEvent {
    /// Summarize an activation
    pub fn activated(manifest_version: impl Into<String>, outcome: &ReconcileOutcome) -> Self {
        let manifest_version = manifest_version.into();
        match outcome {
            ReconcileOutcome::Completed(report) => Self::Activated {
                manifest_version,
                path: Some(report.path),
                retained: report.retained.len(),
                pruned: report.pruned.len(),
                merged: report.merged.len(),
                wiped: false,
                failed_step: None,
                reason: None,
            },
            ReconcileOutcome::Wiped {
                failed_step,
                reason,
            } => Self::Activated {
                manifest_version,
                path: None,
                retained: 0,
                pruned: 0,
                merged: 0,
                wiped: true,
                failed_step: *failed_step,
                reason: Some(reason.clone()),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Installed { .. } => "agent.installed",
            Self::InstallFailed { .. } => "agent.install_failed",
            Self::Activated { .. } => "agent.activated",
            Self::Message { .. } => "agent.message",
        }
    }
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    timestamp: DateTime<Utc>,
    event: &'static str,
    data: &'a AuditEvent,
}

/// Appends audit events to the storage directory's log
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: config.storage.resolved_dir().join(AUDIT_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an event; write failures are logged and never fail a command
    pub async fn record(&self, event: &AuditEvent) {
        if !self.enabled {
            return;
        }

        let entry = AuditEntry {
            timestamp: Utc::now(),
            event: event.name(),
            data: event,
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line + "\n",
            Err(e) => {
                warn!("Failed to serialize audit event {}: {}", event.name(), e);
                return;
            }
        };

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
