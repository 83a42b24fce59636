//! Deployment description baked in at build time
//!
//! A deployment is the agent's origin, its resource manifest and the core
//! shell. All three are immutable for the lifetime of one agent instance;
//! a new manifest means a new agent version and a new upgrade cycle.

pub mod key;
pub mod resource;

pub use key::{normalize_key, Origin, ROOT_KEY};
pub use resource::{CoreShell, ResourceManifest, DEFAULT_CORE_SHELL};

use crate::error::AgentResult;

/// Everything one agent version knows about the assets it guards
#[derive(Debug, Clone)]
pub struct Deployment {
    pub origin: Origin,
    pub manifest: ResourceManifest,
    pub core: CoreShell,
}

impl Deployment {
    /// Validate and assemble a deployment
    pub fn new<S: AsRef<str>>(
        origin: &str,
        manifest: ResourceManifest,
        core: &[S],
    ) -> AgentResult<Self> {
        let origin = Origin::parse(origin)?;
        let core = CoreShell::new(core, &manifest)?;
        Ok(Self {
            origin,
            manifest,
            core,
        })
    }

    /// Version string of the manifest this deployment serves
    pub fn version(&self) -> String {
        self.manifest.version()
    }
}
