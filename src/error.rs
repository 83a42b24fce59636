//! Error types for shellcache
//!
//! All modules use `AgentResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shellcache operations
pub type AgentResult<T> = Result<T, AgentError>;

/// All errors that can occur in shellcache
#[derive(Error, Debug)]
pub enum AgentError {
    // Manifest errors
    #[error("Invalid resource manifest: {0}")]
    ManifestInvalid(String),

    #[error("Core shell resource not in manifest: {0}")]
    CoreShellUnknown(String),

    #[error("Core shell must be a strict subset of the manifest ({core} of {manifest} resources)")]
    CoreShellNotStrict { core: usize, manifest: usize },

    #[error("Invalid origin '{origin}': {reason}")]
    OriginInvalid { origin: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Network errors
    #[error("Network request failed: {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Unexpected response for {url}: HTTP {status}")]
    BadStatus { url: String, status: u16 },

    // Lifecycle errors
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Cannot {action} while agent is {state}")]
    InvalidTransition { action: String, state: String },

    // Cache store errors
    #[error("Cache store error in '{cache}': {reason}")]
    Store { cache: String, reason: String },

    #[error("Corrupt cache entry {key} in '{cache}': {reason}")]
    CorruptEntry {
        cache: String,
        key: String,
        reason: String,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a network error for a request URL
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a cache store error
    pub fn store(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the network primitive
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::BadStatus { .. } | Self::InstallFailed(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InstallFailed(_) => Some("Check connectivity to the origin and rerun: shellcache install"),
            Self::InvalidTransition { .. } => Some("Run: shellcache status"),
            Self::OriginInvalid { .. } => Some("Set agent.origin to scheme://host[:port] without a path"),
            Self::CoreShellUnknown(_) | Self::CoreShellNotStrict { .. } => {
                Some("Check agent.core against the keys of the resource manifest")
            }
            Self::CorruptEntry { .. } => {
                Some("Reinstall to rebuild the caches: shellcache install")
            }
            _ => None,
        }
    }
}
