//! Core shell staging
//!
//! Install fetches every core shell resource with a forced revalidation and
//! writes the batch into the `staging` container. The batch is all-or-nothing:
//! nothing is staged unless every fetch resolved with a 2xx.

use crate::error::{AgentError, AgentResult};
use crate::manifest::{CoreShell, Origin};
use crate::network::{FetchOptions, Network, Request, Response};
use crate::store::{CacheName, CacheStorage};
use futures_util::future::try_join_all;
use tracing::{debug, warn};

/// Fetch the core shell and stage it; returns the staged request URLs
pub async fn stage_core_shell(
    storage: &dyn CacheStorage,
    network: &dyn Network,
    origin: &Origin,
    core: &CoreShell,
) -> AgentResult<Vec<String>> {
    // Leftovers from an abandoned cycle must not be merged at activation
    if storage.delete(CacheName::Staging).await? {
        debug!("Discarded stale staging container");
    }

    let fetches = core.iter().map(|key| fetch_shell_file(network, origin, key));
    let fetched = try_join_all(fetches).await?;

    let staging = storage.open(CacheName::Staging).await?;
    let mut staged = Vec::with_capacity(fetched.len());
    for (url, response) in fetched {
        if let Err(e) = staging.put(&url, response).await {
            if let Err(cleanup) = storage.delete(CacheName::Staging).await {
                warn!("Failed to discard partial staging container: {}", cleanup);
            }
            return Err(AgentError::InstallFailed(format!("staging {}: {}", url, e)));
        }
        staged.push(url);
    }

    Ok(staged)
}

async fn fetch_shell_file(
    network: &dyn Network,
    origin: &Origin,
    key: &str,
) -> AgentResult<(String, Response)> {
    let url = origin.resolve(key);
    let request = Request::get(url.as_str());

    let response = network
        .fetch(&request, FetchOptions::reload())
        .await
        .map_err(|e| AgentError::InstallFailed(e.to_string()))?;

    if !response.is_ok() {
        return Err(AgentError::InstallFailed(
            AgentError::BadStatus {
                url,
                status: response.status,
            }
            .to_string(),
        ));
    }

    debug!("Fetched core shell file {}", key);
    Ok((url, response))
}
