//! shellcache - offline asset caching agent
//!
//! Keeps a deployed web app's static assets available without connectivity
//! and upgrades them incrementally by diffing resource manifests.

pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod network;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{AgentError, AgentResult};
