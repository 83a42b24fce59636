//! Request classification

use crate::manifest::{Origin, ResourceManifest, ROOT_KEY};
use crate::network::{Method, Request};
use std::fmt;

/// How an intercepted request is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Not ours: the request goes to the network untouched
    Passthrough,
    /// The navigation root: fresh when online, cached when offline
    NetworkFirst { key: String },
    /// A manifest resource: cached copy wins
    CacheFirst { key: String },
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passthrough => write!(f, "passthrough"),
            Self::NetworkFirst { key } => write!(f, "network-first {}", key),
            Self::CacheFirst { key } => write!(f, "cache-first {}", key),
        }
    }
}

/// Classify a request against the manifest
///
/// Only same-origin GET requests for declared resources are intercepted.
pub fn route(request: &Request, origin: &Origin, manifest: &ResourceManifest) -> Route {
    if request.method != Method::Get {
        return Route::Passthrough;
    }

    let Some(key) = origin.logical_key(&request.url) else {
        return Route::Passthrough;
    };
    if !manifest.contains(&key) {
        return Route::Passthrough;
    }

    if key == ROOT_KEY {
        Route::NetworkFirst { key }
    } else {
        Route::CacheFirst { key }
    }
}
