//! Resource manifest and core shell
//!
//! The manifest is the build step's output: a JSON object mapping each
//! root-relative resource path (or `/`) to an opaque content fingerprint.
//! Fingerprints are compared, never recomputed.

use crate::error::{AgentError, AgentResult};
use crate::manifest::key::normalize_key;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::btree_map;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default core shell of a Flutter web build
pub const DEFAULT_CORE_SHELL: &[&str] = &[
    "main.dart.js",
    "index.html",
    "flutter_bootstrap.js",
    "assets/AssetManifest.bin.json",
    "assets/FontManifest.json",
];

/// Mapping of logical key to content fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResourceManifest {
    entries: BTreeMap<String, String>,
}

impl<'de> Deserialize<'de> for ResourceManifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        normalize_entries(raw)
            .map(|entries| Self { entries })
            .map_err(serde::de::Error::custom)
    }
}

fn normalize_entries(raw: BTreeMap<String, String>) -> AgentResult<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    for (key, fingerprint) in raw {
        if fingerprint.is_empty() {
            return Err(AgentError::ManifestInvalid(format!(
                "empty fingerprint for '{}'",
                key
            )));
        }
        let normalized = normalize_key(&key);
        if entries.insert(normalized.clone(), fingerprint).is_some() {
            return Err(AgentError::ManifestInvalid(format!(
                "duplicate resource '{}'",
                normalized
            )));
        }
    }
    Ok(entries)
}

impl ResourceManifest {
    /// Parse a manifest from its JSON literal
    pub fn from_json(content: &str) -> AgentResult<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(content)
            .map_err(|e| AgentError::ManifestInvalid(e.to_string()))?;
        Ok(Self {
            entries: normalize_entries(raw)?,
        })
    }

    /// Parse a manifest from a JSON file on disk
    pub async fn from_file(path: &Path) -> AgentResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AgentError::io(format!("reading resource manifest {}", path.display()), e)
        })?;
        Self::from_json(&content)
    }

    /// Serialize the full mapping (keys sorted)
    pub fn to_json(&self) -> AgentResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Fingerprint recorded for a key
    pub fn fingerprint(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether the key is a known resource
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether an entry cached under `prior` may be reused under this manifest
    ///
    /// True only when the key is still declared and its fingerprint is the
    /// same in both manifests.
    pub fn retains(&self, prior: &ResourceManifest, key: &str) -> bool {
        match (self.fingerprint(key), prior.fingerprint(key)) {
            (Some(current), Some(previous)) => current == previous,
            _ => false,
        }
    }

    /// All declared keys, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over (key, fingerprint) pairs
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    /// Number of declared resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest declares nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Short deployment version: first 12 hex chars of SHA256 over the JSON
    pub fn version(&self) -> String {
        let canonical = serde_json::to_vec(&self.entries).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..6])
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ResourceManifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(k, v)| (normalize_key(k.as_ref()), v.into()))
            .collect();
        Self { entries }
    }
}

/// Resources that must be fetched before the agent is usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreShell {
    keys: Vec<String>,
}

impl CoreShell {
    /// Validate a core shell against the manifest it belongs to
    pub fn new<S: AsRef<str>>(keys: &[S], manifest: &ResourceManifest) -> AgentResult<Self> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(keys.len());

        for key in keys {
            let key = normalize_key(key.as_ref());
            if !manifest.contains(&key) {
                return Err(AgentError::CoreShellUnknown(key));
            }
            if seen.insert(key.clone()) {
                normalized.push(key);
            }
        }

        if normalized.len() >= manifest.len() {
            return Err(AgentError::CoreShellNotStrict {
                core: normalized.len(),
                manifest: manifest.len(),
            });
        }

        Ok(Self { keys: normalized })
    }

    /// Core shell keys in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
