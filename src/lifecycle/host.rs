//! Hosting platform side effects
//!
//! The platform owns client pages and version hand-over. The agent only
//! asks it to skip the waiting period and to claim already-open clients.

use crate::error::AgentResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Platform hooks invoked by the lifecycle
#[async_trait]
pub trait Host: Send + Sync {
    /// Let this version take over without waiting for the old one to exit
    async fn skip_waiting(&self) -> AgentResult<()>;

    /// Take control of client pages that are already open
    async fn claim_clients(&self) -> AgentResult<()>;
}

/// Host that records requests for a local driver to act on
#[derive(Debug, Default)]
pub struct LocalHost {
    skip_waiting: AtomicBool,
    claims: AtomicUsize,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether skip-waiting was requested since the last reset
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// How many times clients were claimed
    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn skip_waiting(&self) -> AgentResult<()> {
        debug!("Skip waiting requested");
        self.skip_waiting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_clients(&self) -> AgentResult<()> {
        debug!("Claiming open clients");
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
