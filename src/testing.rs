//! Test doubles shared by unit tests

use crate::error::{AgentError, AgentResult};
use crate::lifecycle::LocalHost;
use crate::manifest::{Deployment, ResourceManifest};
use crate::network::{FetchOptions, Network, Request, Response};
use crate::store::MemoryStorage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const ORIGIN: &str = "https://app.test";

pub fn url(key: &str) -> String {
    if key == "/" {
        format!("{}/", ORIGIN)
    } else {
        format!("{}/{}", ORIGIN, key)
    }
}

pub fn manifest(entries: &[(&str, &str)]) -> ResourceManifest {
    entries.iter().copied().collect()
}

pub fn deployment(entries: &[(&str, &str)], core: &[&str]) -> Deployment {
    Deployment::new(ORIGIN, manifest(entries), core).unwrap()
}

/// Network serving canned responses; unknown URLs get a 404
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Option<Response>>>,
    calls: Mutex<Vec<(String, FetchOptions)>>,
    offline: AtomicBool,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a 200 with `body` at `url`
    pub fn serve(&self, url: &str, body: &str) -> &Self {
        self.respond(url, Response::new(200, body))
    }

    pub fn respond(&self, url: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Some(response));
        self
    }

    /// Reject fetches of `url`
    pub fn fail(&self, url: &str) -> &Self {
        self.routes.lock().unwrap().insert(url.to_string(), None);
        self
    }

    /// Reject every fetch
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, FetchOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request, options: FetchOptions) -> AgentResult<Response> {
        self.calls
            .lock()
            .unwrap()
            .push((request.url.clone(), options));

        if self.offline.load(Ordering::SeqCst) {
            return Err(AgentError::network(&request.url, "offline"));
        }
        match self.routes.lock().unwrap().get(&request.url) {
            Some(Some(response)) => Ok(response.clone()),
            Some(None) => Err(AgentError::network(&request.url, "connection refused")),
            None => Ok(Response::new(404, "not found")),
        }
    }
}

/// Fresh in-memory collaborators
pub fn harness() -> (Arc<MemoryStorage>, Arc<ScriptedNetwork>, Arc<LocalHost>) {
    (
        Arc::new(MemoryStorage::new()),
        Arc::new(ScriptedNetwork::new()),
        Arc::new(LocalHost::new()),
    )
}
