//! Lifecycle state and its persisted record

use crate::error::{AgentError, AgentResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs;

/// Agent lifecycle state
///
/// ```text
/// Uninstalled --install--> Staging --activate--> Reconciling --> Active
///      ^                      |                                    |
///      +---install failed-----+           Active --install--> Staging
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// No core shell staged for this version
    Uninstalled,
    /// Core shell staged, waiting for activation
    Staging,
    /// Activation in progress
    Reconciling,
    /// Serving fetches
    Active,
}

impl AgentState {
    /// Only an active agent routes fetches with its own manifest
    pub fn intercepts_fetches(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether a previously activated version keeps serving in this state
    pub fn awaits_activation(&self) -> bool {
        matches!(self, Self::Uninstalled | Self::Staging)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninstalled => write!(f, "uninstalled"),
            Self::Staging => write!(f, "staging"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Lifecycle record persisted between driver runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Last state reached
    pub state: AgentState,

    /// Version of the manifest the state refers to
    pub manifest_version: String,

    /// When the core shell was last staged
    pub installed_at: Option<DateTime<Utc>>,

    /// When reconciliation last ran
    pub activated_at: Option<DateTime<Utc>>,

    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Create a record for a manifest version
    pub fn new(manifest_version: impl Into<String>) -> Self {
        Self {
            state: AgentState::Uninstalled,
            manifest_version: manifest_version.into(),
            installed_at: None,
            activated_at: None,
            updated_at: Utc::now(),
        }
    }

    /// State to resume from for the given manifest version
    ///
    /// A different version is a new agent and starts uninstalled; the
    /// previously activated version keeps serving until it activates. An
    /// interrupted reconciliation resumes from `Staging`: rerunning it is
    /// safe because the new manifest is persisted only near the end.
    pub fn resume_state(&self, manifest_version: &str) -> AgentState {
        if self.manifest_version != manifest_version {
            return AgentState::Uninstalled;
        }
        match self.state {
            AgentState::Reconciling => AgentState::Staging,
            state => state,
        }
    }

    /// Record a transition
    pub fn transition(&mut self, state: AgentState) {
        let now = Utc::now();
        match state {
            AgentState::Staging => self.installed_at = Some(now),
            AgentState::Active if self.state != AgentState::Active => {
                self.activated_at = Some(now)
            }
            _ => {}
        }
        self.state = state;
        self.updated_at = now;
    }

    /// Load the record from a file, if present
    pub async fn load(path: &Path) -> AgentResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::io(format!("reading agent record {}", path.display()), e))?;

        let record: AgentRecord = serde_json::from_str(&content)?;
        Ok(Some(record))
    }

    /// Save the record to a file
    pub async fn save(&self, path: &Path) -> AgentResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::io("creating state directory", e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .await
            .map_err(|e| AgentError::io(format!("writing agent record {}", path.display()), e))?;

        Ok(())
    }
}
