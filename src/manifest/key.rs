//! Logical keys and origin-relative URL resolution
//!
//! Every cached entry is stored under its absolute request URL, while the
//! resource manifest speaks in logical keys: paths relative to the agent's
//! own origin, with `/` reserved for the navigation root.

use crate::error::{AgentError, AgentResult};
use std::fmt;

/// Sentinel key for the navigation root document
pub const ROOT_KEY: &str = "/";

/// Cache-busting query marker stripped before lookup
const CACHE_BUST_MARKER: &str = "?v=";

/// Normalize a manifest key: drop leading slashes, empty means root
pub fn normalize_key(key: &str) -> String {
    let trimmed = key.trim_start_matches('/');
    if trimmed.is_empty() {
        ROOT_KEY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// The agent's own origin (`scheme://host[:port]`, no trailing slash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parse and validate an origin string
    pub fn parse(origin: &str) -> AgentResult<Self> {
        let invalid = |reason: &str| AgentError::OriginInvalid {
            origin: origin.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = origin.trim().trim_end_matches('/');
        let authority = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .ok_or_else(|| invalid("scheme must be http or https"))?;

        if authority.is_empty() {
            return Err(invalid("missing host"));
        }
        if authority.contains(['/', '?', '#']) {
            return Err(invalid("must not contain a path, query or fragment"));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Origin as a string, without trailing slash
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute request URL for a logical key
    pub fn resolve(&self, key: &str) -> String {
        if key == ROOT_KEY {
            format!("{}/", self.0)
        } else {
            format!("{}/{}", self.0, key.trim_start_matches('/'))
        }
    }

    /// Absolute request URL for user input: URLs pass through, paths are joined
    pub fn request_url(&self, target: &str) -> String {
        if target.contains("://") {
            target.to_string()
        } else {
            format!("{}/{}", self.0, target.trim_start_matches('/'))
        }
    }

    /// Derive the logical key of a request URL
    ///
    /// Returns `None` for URLs outside this origin. The `?v=` suffix and any
    /// fragment are stripped; the origin itself, `origin/#...` and an empty
    /// path all map to [`ROOT_KEY`].
    pub fn logical_key(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix(self.0.as_str())?;
        if rest.is_empty() {
            return Some(ROOT_KEY.to_string());
        }

        let path = rest.strip_prefix('/')?;
        let path = path
            .split_once(CACHE_BUST_MARKER)
            .map_or(path, |(head, _)| head);
        let path = path.split_once('#').map_or(path, |(head, _)| head);

        Some(normalize_key(path))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
