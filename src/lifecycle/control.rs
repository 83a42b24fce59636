//! Control messages from client pages

use crate::error::{AgentError, AgentResult};
use crate::manifest::{Origin, ResourceManifest};
use crate::network::{FetchOptions, Network, Request, Response};
use crate::store::Container;
use futures_util::future::try_join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// A recognized control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Activate the waiting version without waiting for old clients
    SkipWaiting,
    /// Fetch every manifest resource not yet in `content`
    DownloadOffline,
}

impl ControlCommand {
    /// Parse a message; anything but the exact literals is not a command
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            "skipWaiting" => Some(Self::SkipWaiting),
            "downloadOffline" => Some(Self::DownloadOffline),
            _ => None,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipWaiting => write!(f, "skipWaiting"),
            Self::DownloadOffline => write!(f, "downloadOffline"),
        }
    }
}

/// Result of a `downloadOffline` prefetch
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrefetchReport {
    /// Manifest keys already present in `content`
    pub already_cached: usize,
    /// URLs fetched and stored
    pub fetched: Vec<String>,
}

/// Fetch and store every manifest resource missing from `content`
///
/// Presence is decided by logical key, so a cache-busted entry counts for its
/// resource. The batch is written only once every fetch resolved OK.
pub async fn prefetch_missing(
    content: &dyn Container,
    network: &dyn Network,
    origin: &Origin,
    manifest: &ResourceManifest,
) -> AgentResult<PrefetchReport> {
    let present: HashSet<String> = content
        .keys()
        .await?
        .iter()
        .filter_map(|url| origin.logical_key(url))
        .collect();

    let missing: Vec<String> = manifest
        .keys()
        .filter(|key| !present.contains(*key))
        .map(|key| origin.resolve(key))
        .collect();

    let already_cached = manifest.len() - missing.len();
    if missing.is_empty() {
        info!("All {} resources already cached", already_cached);
        return Ok(PrefetchReport {
            already_cached,
            fetched: vec![],
        });
    }

    debug!("Prefetching {} resources", missing.len());
    let fetched = try_join_all(missing.iter().map(|url| fetch_ok(network, url))).await?;

    for (url, response) in missing.iter().zip(fetched) {
        content.put(url, response).await?;
    }

    info!("Prefetched {} resources", missing.len());
    Ok(PrefetchReport {
        already_cached,
        fetched: missing,
    })
}

async fn fetch_ok(network: &dyn Network, url: &str) -> AgentResult<Response> {
    let response = network
        .fetch(&Request::get(url), FetchOptions::default())
        .await?;
    if !response.is_ok() {
        return Err(AgentError::BadStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    Ok(response)
}
