//! Namespaced key-value store offered to plugins.
//!
//! One [`CacheStore`] lives as long as a [`crate::Tape`]; every plugin gets a
//! [`PluginCache`] view bound to its own name and cannot see other plugins'
//! entries. The compiler never evicts anything: plugins release what they own
//! from `on_change` or `cleanup`.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

type Namespace = FxHashMap<String, Value>;

/// Backing storage shared by all namespaces.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<Mutex<FxHashMap<String, Namespace>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// View scoped to `namespace` (a plugin name).
    pub fn namespace(&self, namespace: &str) -> PluginCache {
        PluginCache {
            namespace: namespace.to_string(),
            store: self.clone(),
        }
    }

    /// Drop every namespace.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// A single plugin's slice of the [`CacheStore`].
#[derive(Debug, Clone)]
pub struct PluginCache {
    namespace: String,
    store: CacheStore,
}

impl PluginCache {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store
            .inner
            .lock()
            .get(&self.namespace)
            .and_then(|ns| ns.get(key))
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.store
            .inner
            .lock()
            .entry(self.namespace.clone())
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.store
            .inner
            .lock()
            .get(&self.namespace)
            .is_some_and(|ns| ns.contains_key(key))
    }

    /// Remove a key, returning its value.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let mut inner = self.store.inner.lock();
        let ns = inner.get_mut(&self.namespace)?;
        let removed = ns.remove(key);
        if ns.is_empty() {
            inner.remove(&self.namespace);
        }
        removed
    }

    /// Snapshot of this namespace, sorted by key.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let inner = self.store.inner.lock();
        let mut entries: Vec<_> = inner
            .get(&self.namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespaces_are_isolated() {
        let store = CacheStore::new();
        let sass = store.namespace("sass");
        let css = store.namespace("tape-css");

        sass.set("/a.scss", json!({ "compiled": true }));
        assert!(sass.has("/a.scss"));
        assert!(!css.has("/a.scss"));
        assert_eq!(css.get("/a.scss"), None);
        assert_eq!(sass.get("/a.scss"), Some(json!({ "compiled": true })));
    }

    #[test]
    fn test_delete_and_entries() {
        let store = CacheStore::new();
        let cache = store.namespace("urls");
        cache.set("b", "blob:2");
        cache.set("a", "blob:1");

        let entries = cache.entries();
        assert_eq!(entries[0], ("a".to_string(), json!("blob:1")));
        assert_eq!(entries.len(), 2);

        assert_eq!(cache.delete("a"), Some(json!("blob:1")));
        assert_eq!(cache.delete("a"), None);
        assert_eq!(cache.entries().len(), 1);
    }

    #[test]
    fn test_views_share_storage() {
        let store = CacheStore::new();
        store.namespace("p").set("k", 1);
        assert_eq!(store.namespace("p").get("k"), Some(json!(1)));

        store.clear();
        assert!(!store.namespace("p").has("k"));
    }
}
