//! Fetch policies
//!
//! Both policies take the `content` container as an explicit handle. Cache
//! writes happen only after a fetch resolved, so a dropped task never leaves
//! a partial entry behind.

use crate::error::AgentResult;
use crate::network::{FetchOptions, Network, Request, Response};
use crate::store::Container;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Cache hit, no network involved
    Cache,
    /// Fresh from the network
    Network,
    /// Cached fallback after the network failed
    StaleCache,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Network => write!(f, "network"),
            Self::StaleCache => write!(f, "stale cache"),
        }
    }
}

/// A response together with its source
#[derive(Debug, Clone)]
pub struct Served {
    pub response: Response,
    pub source: Source,
}

impl Served {
    fn new(response: Response, source: Source) -> Self {
        Self { response, source }
    }
}

/// Serve from `content` when present, otherwise fetch and populate lazily
///
/// A failing cache read counts as a miss. Only OK responses are written back,
/// and a failed write is logged without affecting the response.
pub async fn cache_first(
    content: &dyn Container,
    network: &dyn Network,
    request: &Request,
) -> AgentResult<Served> {
    match content.match_entry(&request.url).await {
        Ok(Some(cached)) => {
            debug!("Cache hit: {}", request.url);
            return Ok(Served::new(cached, Source::Cache));
        }
        Ok(None) => debug!("Cache miss: {}", request.url),
        Err(e) => warn!("Cache lookup failed for {}, treating as miss: {}", request.url, e),
    }

    let response = network.fetch(request, FetchOptions::default()).await?;
    if response.is_ok() {
        if let Err(e) = content.put(&request.url, response.clone()).await {
            warn!("Failed to cache {}: {}", request.url, e);
        }
    }

    Ok(Served::new(response, Source::Network))
}

/// Prefer the network, falling back to `content` when it is unreachable
///
/// Any resolved response refreshes the cached copy. With no cached copy the
/// original network error is returned.
pub async fn network_first(
    content: &dyn Container,
    network: &dyn Network,
    request: &Request,
) -> AgentResult<Served> {
    match network.fetch(request, FetchOptions::default()).await {
        Ok(response) => {
            if let Err(e) = content.put(&request.url, response.clone()).await {
                warn!("Failed to cache {}: {}", request.url, e);
            }
            Ok(Served::new(response, Source::Network))
        }
        Err(network_error) => {
            debug!("Network failed for {}: {}", request.url, network_error);
            match content.match_entry(&request.url).await {
                Ok(Some(cached)) => Ok(Served::new(cached, Source::StaleCache)),
                Ok(None) => Err(network_error),
                Err(e) => {
                    warn!("Cache fallback failed for {}: {}", request.url, e);
                    Err(network_error)
                }
            }
        }
    }
}
