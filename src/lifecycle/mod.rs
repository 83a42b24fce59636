//! Agent lifecycle
//!
//! The [`Agent`] ties a [`Deployment`] to its collaborators and drives the
//! state machine through the four lifecycle triggers:
//!
//! - `install`: stage the core shell and request skip-waiting
//! - `activate`: reconcile caches, then intercept fetches
//! - `fetch`: route and serve a request
//! - `message`: handle a control command
//!
//! Install and activate serialize on the lifecycle lock. Fetches never take
//! it. An active agent routes them with its own manifest; a pending version
//! leaves them to the last activated manifest, and a reconciling agent
//! passes them through.

pub mod control;
pub mod host;
pub mod install;
pub mod policy;
pub mod reconcile;
pub mod router;
pub mod state;

pub use control::{ControlCommand, PrefetchReport};
pub use host::{Host, LocalHost};
pub use policy::{Served, Source};
pub use reconcile::{ReconcileOutcome, ReconcilePath, ReconcileReport, ReconcileStep, Reconciler};
pub use router::Route;
pub use state::{AgentRecord, AgentState};

use crate::error::{AgentError, AgentResult};
use crate::manifest::{Deployment, ResourceManifest};
use crate::network::{FetchOptions, Network, Request, Response};
use crate::store::{CacheName, CacheStorage};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Result of intercepting a fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The request bypassed the agent
    Passthrough(Response),
    /// The agent served the request under a policy
    Served { route: Route, served: Served },
}

impl FetchOutcome {
    pub fn response(&self) -> &Response {
        match self {
            Self::Passthrough(response) => response,
            Self::Served { served, .. } => &served.response,
        }
    }

    /// Human-readable source of the response
    pub fn source_label(&self) -> String {
        match self {
            Self::Passthrough(_) => "passthrough".to_string(),
            Self::Served { served, .. } => served.source.to_string(),
        }
    }
}

/// Result of a control message
#[derive(Debug, Clone)]
pub enum ControlOutcome {
    SkipWaiting,
    Prefetched(PrefetchReport),
    Ignored,
}

/// One agent version bound to its deployment
pub struct Agent {
    deployment: Deployment,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
    lifecycle: Mutex<()>,
    state: RwLock<AgentState>,
}

impl Agent {
    /// Create an uninstalled agent
    pub fn new(
        deployment: Deployment,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        host: Arc<dyn Host>,
    ) -> Self {
        Self::with_state(deployment, storage, network, host, AgentState::Uninstalled)
    }

    /// Create an agent resuming from a recorded state
    pub fn with_state(
        deployment: Deployment,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        host: Arc<dyn Host>,
        state: AgentState,
    ) -> Self {
        Self {
            deployment,
            storage,
            network,
            host,
            lifecycle: Mutex::new(()),
            state: RwLock::new(state),
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    async fn set_state(&self, state: AgentState) {
        let mut current = self.state.write().await;
        if *current != state {
            info!("Agent {} -> {}", *current, state);
        }
        *current = state;
    }

    /// Install trigger: stage the core shell
    ///
    /// Allowed from any state but `Reconciling`. On failure an agent that was
    /// staging falls back to `Uninstalled`; an active agent keeps serving its
    /// previous caches.
    pub async fn install(&self) -> AgentResult<Vec<String>> {
        let _guard = self.lifecycle.lock().await;

        let previous = self.state().await;
        if previous == AgentState::Reconciling {
            return Err(AgentError::InvalidTransition {
                action: "install".to_string(),
                state: previous.to_string(),
            });
        }

        info!(
            "Installing {} core shell resources for manifest {}",
            self.deployment.core.len(),
            self.deployment.version()
        );

        let staged = install::stage_core_shell(
            self.storage.as_ref(),
            self.network.as_ref(),
            &self.deployment.origin,
            &self.deployment.core,
        )
        .await;

        match staged {
            Ok(staged) => {
                self.host.skip_waiting().await?;
                self.set_state(AgentState::Staging).await;
                Ok(staged)
            }
            Err(e) => {
                warn!("Install failed: {}", e);
                let fallback = match previous {
                    AgentState::Staging => AgentState::Uninstalled,
                    other => other,
                };
                self.set_state(fallback).await;
                Err(e)
            }
        }
    }

    /// Activate trigger: reconcile caches and start intercepting
    ///
    /// A wipe still leaves the agent active; it then serves from the network
    /// and repopulates `content` lazily.
    pub async fn activate(&self) -> AgentResult<ReconcileOutcome> {
        let _guard = self.lifecycle.lock().await;

        let current = self.state().await;
        if current != AgentState::Staging {
            return Err(AgentError::InvalidTransition {
                action: "activate".to_string(),
                state: current.to_string(),
            });
        }

        self.set_state(AgentState::Reconciling).await;
        let outcome = Reconciler::new(
            self.storage.as_ref(),
            self.host.as_ref(),
            &self.deployment.origin,
            &self.deployment.manifest,
        )
        .run()
        .await;
        self.set_state(AgentState::Active).await;

        Ok(outcome)
    }

    /// Fetch trigger
    ///
    /// An active agent routes with its own manifest. While this version is
    /// uninstalled or staged, the last activated manifest keeps routing, so
    /// the previous deployment stays available offline until activation.
    pub async fn handle_fetch(&self, request: &Request) -> AgentResult<FetchOutcome> {
        let state = self.state().await;
        let route = if state.intercepts_fetches() {
            router::route(request, &self.deployment.origin, &self.deployment.manifest)
        } else if state.awaits_activation() {
            match self.previous_manifest().await {
                Some(previous) => router::route(request, &self.deployment.origin, &previous),
                None => {
                    debug!("No activated version yet, not intercepting {}", request.url);
                    Route::Passthrough
                }
            }
        } else {
            debug!("Agent is {}, not intercepting {}", state, request.url);
            Route::Passthrough
        };

        let served = match &route {
            Route::Passthrough => {
                let response = self.network.fetch(request, FetchOptions::default()).await?;
                return Ok(FetchOutcome::Passthrough(response));
            }
            Route::CacheFirst { .. } => {
                let content = self.storage.open(CacheName::Content).await?;
                policy::cache_first(content.as_ref(), self.network.as_ref(), request).await?
            }
            Route::NetworkFirst { .. } => {
                let content = self.storage.open(CacheName::Content).await?;
                policy::network_first(content.as_ref(), self.network.as_ref(), request).await?
            }
        };

        debug!("Served {} via {} from {}", request.url, route, served.source);
        Ok(FetchOutcome::Served { route, served })
    }

    /// Version of the manifest currently routing fetches, if any
    pub async fn serving_version(&self) -> Option<String> {
        let state = self.state().await;
        if state.intercepts_fetches() {
            Some(self.deployment.version())
        } else if state.awaits_activation() {
            self.previous_manifest().await.map(|manifest| manifest.version())
        } else {
            None
        }
    }

    /// Manifest persisted by the last completed activation
    ///
    /// Unreadable state counts as none; fetches then pass through.
    async fn previous_manifest(&self) -> Option<ResourceManifest> {
        match self.read_previous_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Previous manifest unreadable, passing fetches through: {}", e);
                None
            }
        }
    }

    async fn read_previous_manifest(&self) -> AgentResult<Option<ResourceManifest>> {
        if !self.storage.has(CacheName::Manifest).await? {
            return Ok(None);
        }
        let cache = self.storage.open(CacheName::Manifest).await?;
        reconcile::read_persisted_manifest(cache.as_ref()).await
    }

    /// Message trigger
    pub async fn handle_message(&self, message: &str) -> AgentResult<ControlOutcome> {
        let Some(command) = ControlCommand::parse(message) else {
            debug!("Ignoring unknown message {:?}", message);
            return Ok(ControlOutcome::Ignored);
        };

        info!("Received {} command", command);
        match command {
            ControlCommand::SkipWaiting => {
                self.host.skip_waiting().await?;
                Ok(ControlOutcome::SkipWaiting)
            }
            ControlCommand::DownloadOffline => {
                let content = self.storage.open(CacheName::Content).await?;
                let report = control::prefetch_missing(
                    content.as_ref(),
                    self.network.as_ref(),
                    &self.deployment.origin,
                    &self.deployment.manifest,
                )
                .await?;
                Ok(ControlOutcome::Prefetched(report))
            }
        }
    }
}
