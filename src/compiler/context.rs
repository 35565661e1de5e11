//! Compilation state.
//!
//! - [`SourceStore`]: raw file contents, in-memory first, loader second
//! - [`CompileContext`]: everything one pass accumulates, reusable by the next

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::{FileLoader, FileSource};
use crate::error::{Result, TapeError};
use crate::graph::DependencyGraph;
use crate::identity::{AssetId, IdResolver};
use crate::plugin::Asset;
use crate::reporter::Diagnostic;

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceFile {
    /// Absolute path
    path: String,
    content: String,
}

/// Raw file contents keyed by id.
///
/// A map entry of `None` marks the file absent and also hides whatever the
/// loader would return for it.
#[derive(Default)]
pub struct SourceStore {
    files: FxHashMap<AssetId, Option<SourceFile>>,
    loader: Option<Arc<dyn FileLoader>>,
}

impl SourceStore {
    pub fn new(source: FileSource, resolver: &IdResolver) -> Self {
        let mut store = Self {
            files: FxHashMap::default(),
            loader: source.loader,
        };
        for (path, content) in source.map {
            store.set(&path, content, resolver);
        }
        store
    }

    /// Replace one file. Returns its id when the stored value changed.
    pub fn set(
        &mut self,
        path: &str,
        content: Option<String>,
        resolver: &IdResolver,
    ) -> Option<AssetId> {
        let id = resolver.path_to_id(path, None);
        let file = content.map(|content| SourceFile {
            path: resolver.id_to_path(&id),
            content,
        });

        // a loader-backed file has no stored value to compare against
        if self.files.get(&id) == Some(&file) {
            return None;
        }
        self.files.insert(id.clone(), file);
        Some(id)
    }

    /// Raw content of `id`, or `None` if no such file exists.
    pub async fn read(&self, id: &AssetId, resolver: &IdResolver) -> Result<Option<String>> {
        if let Some(file) = self.files.get(id) {
            return Ok(file.as_ref().map(|f| f.content.clone()));
        }

        let (Some(loader), Some(path)) = (&self.loader, resolver.known_path(id)) else {
            return Ok(None);
        };

        crate::debug!("load"; "{}", path);
        loader.load(&path).await.map_err(|err| {
            TapeError::Diagnostic(Box::new(
                Diagnostic::error(format!("Loading: {err:#}")).with_path(path.clone()),
            ))
        })
    }

    /// A fresh asset for `id`, decorated with its source metadata.
    pub async fn load(&self, id: &AssetId, resolver: &IdResolver) -> Result<Option<Asset>> {
        let Some(content) = self.read(id, resolver).await? else {
            return Ok(None);
        };
        let path = resolver.id_to_path(id);
        Ok(Some(Asset::from_file(id.clone(), &path, content)))
    }
}

impl std::fmt::Debug for SourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStore")
            .field("files", &self.files.len())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

// ============================================================================
// Compile context
// ============================================================================

/// Accumulated state of a compilation pass.
///
/// Handed back after every successful pass and, in dev mode, seeded into the
/// next one after invalidation has purged whatever an update touched.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    pub graph: DependencyGraph,
    pub transformed: FxHashMap<AssetId, Asset>,
    pub packaged: FxHashMap<AssetId, Asset>,
    /// Id → output path, for every written asset
    pub resolve_map: FxHashMap<AssetId, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileContext {
    /// Forget everything known about `id`.
    pub fn purge(&mut self, id: &AssetId) {
        self.graph.remove_node(id);
        self.transformed.remove(id);
        self.packaged.remove(id);
        self.resolve_map.remove(id);
    }

    /// Whether `id` was produced from inside another asset.
    pub fn is_embedded(&self, id: &AssetId) -> bool {
        self.transformed
            .get(id)
            .or_else(|| self.packaged.get(id))
            .is_some_and(|asset| asset.embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileMap;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl FileLoader for Echo {
        async fn load(&self, path: &str) -> anyhow::Result<Option<String>> {
            match path {
                "/broken.css" => anyhow::bail!("disk on fire"),
                "/gone.css" => Ok(None),
                _ => Ok(Some(format!("loaded {path}"))),
            }
        }
    }

    fn store(files: &[(&str, Option<&str>)], resolver: &IdResolver) -> SourceStore {
        let map: FileMap = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.map(str::to_string)))
            .collect();
        SourceStore::new(FileSource::from(map).with_loader(Echo), resolver)
    }

    #[tokio::test]
    async fn test_map_shadows_loader() {
        let resolver = IdResolver::new();
        let store = store(&[("/a.css", Some("mapped")), ("/hidden.css", None)], &resolver);

        let a = resolver.path_to_id("a.css", None);
        assert_eq!(store.read(&a, &resolver).await.unwrap().as_deref(), Some("mapped"));

        let hidden = resolver.path_to_id("/hidden.css", None);
        assert_eq!(store.read(&hidden, &resolver).await.unwrap(), None);

        let other = resolver.path_to_id("/b.css", None);
        assert_eq!(
            store.read(&other, &resolver).await.unwrap().as_deref(),
            Some("loaded /b.css")
        );
    }

    #[tokio::test]
    async fn test_loader_errors_become_diagnostics() {
        let resolver = IdResolver::new();
        let store = store(&[], &resolver);

        let gone = resolver.path_to_id("/gone.css", None);
        assert!(store.load(&gone, &resolver).await.unwrap().is_none());

        let broken = resolver.path_to_id("/broken.css", None);
        let err = store.read(&broken, &resolver).await.unwrap_err();
        let diagnostic = err.diagnostic().unwrap();
        assert_eq!(diagnostic.path.as_deref(), Some("/broken.css"));
        assert!(diagnostic.message.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_unknown_ids_never_reach_loader() {
        let resolver = IdResolver::new();
        let store = store(&[], &resolver);
        let id = AssetId::new("parent:0");
        assert_eq!(store.read(&id, &resolver).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_decorates_source() {
        let resolver = IdResolver::new();
        let store = store(&[("/css/style.scss", Some("a {}"))], &resolver);
        let id = resolver.path_to_id("/css/style.scss", None);

        let asset = store.load(&id, &resolver).await.unwrap().unwrap();
        assert_eq!(asset.id, id);
        assert_eq!(asset.ext, ".scss");
        assert_eq!(asset.source.dir, "/css");
        assert_eq!(asset.content, "a {}");
    }

    #[test]
    fn test_set_reports_only_changes() {
        let resolver = IdResolver::new();
        let mut store = store(&[("/a.css", Some("x"))], &resolver);

        assert!(store.set("/a.css", Some("x".into()), &resolver).is_none());
        assert!(store.set("a.css", Some("y".into()), &resolver).is_some());
        assert!(store.set("/a.css", None, &resolver).is_some());
        assert!(store.set("/a.css", None, &resolver).is_none());
        assert!(store.set("/new.css", Some("n".into()), &resolver).is_some());
    }
}
