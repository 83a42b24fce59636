//! Local driver playing the hosting platform's role
//!
//! Each CLI invocation rebuilds the agent from configuration, resumes its
//! lifecycle state from `agent.json` in the storage directory and records
//! every transition back there.

use crate::audit::{AuditEvent, AuditLog};
use crate::config::Config;
use crate::error::AgentResult;
use crate::lifecycle::{Agent, AgentRecord, AgentState, LocalHost, ReconcileOutcome};
use crate::manifest::{Deployment, ResourceManifest};
use crate::network::HttpNetwork;
use crate::store::FsStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// File name of the lifecycle record inside the storage directory
pub const RECORD_FILE: &str = "agent.json";

/// Agent plus the persistence a long-lived host would provide
pub struct Driver {
    agent: Agent,
    host: Arc<LocalHost>,
    record: AgentRecord,
    record_path: PathBuf,
    audit: AuditLog,
}

impl Driver {
    /// Build the agent described by `config` over durable storage
    pub async fn open(config: &Config) -> AgentResult<Self> {
        let manifest = ResourceManifest::from_file(&config.agent.manifest).await?;
        let deployment = Deployment::new(&config.agent.origin, manifest, config.agent.core.as_slice())?;
        let version = deployment.version();

        let dir = config.storage.resolved_dir();
        let record_path = dir.join(RECORD_FILE);
        let record = match AgentRecord::load(&record_path).await? {
            Some(record) if record.manifest_version == version => record,
            Some(record) => {
                info!(
                    "Manifest changed ({} -> {}), starting a new upgrade cycle",
                    record.manifest_version, version
                );
                AgentRecord::new(&version)
            }
            None => AgentRecord::new(&version),
        };
        let state = record.resume_state(&version);
        debug!("Resuming agent {} in state {}", version, state);

        let host = Arc::new(LocalHost::new());
        let agent = Agent::with_state(
            deployment,
            Arc::new(FsStorage::new(dir)),
            Arc::new(HttpNetwork::new(config.network.user_agent.clone())),
            host.clone(),
            state,
        );

        Ok(Self {
            agent,
            host,
            record,
            record_path,
            audit: AuditLog::new(config),
        })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    /// Whether the agent asked to skip waiting during this invocation
    pub fn skip_waiting_requested(&self) -> bool {
        self.host.skip_waiting_requested()
    }

    /// Run the install trigger and record the result
    pub async fn install(&mut self) -> AgentResult<Vec<String>> {
        let result = self.agent.install().await;
        let version = self.agent.deployment().version();

        match &result {
            Ok(staged) => {
                self.record.transition(AgentState::Staging);
                self.audit
                    .record(&AuditEvent::Installed {
                        manifest_version: version,
                        staged: staged.clone(),
                    })
                    .await;
            }
            Err(e) => {
                self.sync_state().await;
                self.audit
                    .record(&AuditEvent::InstallFailed {
                        manifest_version: version,
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        self.record.save(&self.record_path).await?;
        result
    }

    /// Run the activate trigger and record the result
    pub async fn activate(&mut self) -> AgentResult<ReconcileOutcome> {
        let outcome = self.agent.activate().await?;
        let version = self.agent.deployment().version();

        self.record.transition(AgentState::Active);
        self.audit
            .record(&AuditEvent::activated(version, &outcome))
            .await;

        self.record.save(&self.record_path).await?;
        Ok(outcome)
    }

    /// Record a control command in the audit log
    pub async fn audit_message(&self, command: &str, data: serde_json::Value) {
        self.audit
            .record(&AuditEvent::Message {
                command: command.to_string(),
                result: data,
            })
            .await;
    }

    async fn sync_state(&mut self) {
        let state = self.agent.state().await;
        if state != self.record.state {
            self.record.transition(state);
        }
    }
}
