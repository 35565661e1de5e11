//! Asset identity.
//!
//! An [`AssetId`] is the blake3 hash of an asset's absolute virtual path, so
//! the same file always maps to the same id within a pass and across passes.
//! Embedded assets use synthetic ids derived from their parent
//! (`<parent>:<index>`) and never go through the hash.

use std::fmt;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::utils::path;

/// Hex chars kept from the blake3 digest (128 bits).
const ID_LEN: usize = 32;

/// Stable identifier of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Wrap an already-computed id (embedded ids, ids given by plugins).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Hash an absolute path into an id. No resolution happens here.
    pub fn from_absolute_path(absolute: &str) -> Self {
        let digest = blake3::hash(absolute.as_bytes());
        let mut hex = hex::encode(digest.as_bytes());
        hex.truncate(ID_LEN);
        Self(hex)
    }

    /// Id of the `index`-th embedded child of this asset.
    pub fn embedded(&self, index: usize) -> Self {
        Self(format!("{}:{index}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Maps paths to ids and remembers the reverse mapping for diagnostics.
#[derive(Debug, Default)]
pub struct IdResolver {
    paths: RwLock<FxHashMap<AssetId, String>>,
}

impl IdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `path` against `dir` (root when `None`) and return its id.
    pub fn path_to_id(&self, path: &str, dir: Option<&str>) -> AssetId {
        let absolute = path::resolve(dir.unwrap_or("/"), path);
        let id = AssetId::from_absolute_path(&absolute);
        self.paths.write().entry(id.clone()).or_insert(absolute);
        id
    }

    /// Absolute path for a known id, or the id itself.
    pub fn id_to_path(&self, id: &AssetId) -> String {
        self.known_path(id).unwrap_or_else(|| id.to_string())
    }

    /// Absolute path for ids that came from [`Self::path_to_id`].
    pub fn known_path(&self, id: &AssetId) -> Option<String> {
        self.paths.read().get(id).cloned()
    }
}
