//! Plugin contract.
//!
//! A plugin is a named set of capabilities ([`Stage`]s) scoped to a list of
//! extensions. The compiler dispatches on [`Plugin::handles`]: a plugin runs
//! for an asset when it declares the stage and either lists the asset's
//! current extension, declares no extensions at all, or the asset has no
//! extension.
//!
//! ```text
//! transform ──► package ──► optimize ──► write
//!   (deps)      (resolve)    (content)    (output path)
//! ```
//!
//! Each stage receives a context carrying only what that stage may use.
//!
//! - [`registry`]: loading, validation, default plugin injection
//! - [`cache`]: per-plugin key-value store
//! - [`html`], [`css`], [`write`]: built-in plugins
//! - [`edits`]: range splicing shared by the built-in plugins

pub mod cache;
pub mod css;
pub mod edits;
pub mod html;
pub mod registry;
pub mod write;

use async_trait::async_trait;
use enumset::{EnumSet, EnumSetType};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

pub use cache::{CacheStore, PluginCache};
pub use registry::{PluginConstructor, PluginLoader};

use crate::compiler::context::SourceStore;
use crate::error::Result;
use crate::identity::{AssetId, IdResolver};
use crate::reporter::Reporter;
use crate::utils::path;

// ============================================================================
// Assets
// ============================================================================

/// Where an asset came from. Embedded assets carry their parent's source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetSource {
    /// Absolute virtual path
    pub path: String,
    pub dir: String,
    /// File name without extension
    pub name: String,
    /// Extension the file was loaded with
    pub ext: String,
}

impl AssetSource {
    pub fn from_path(absolute: &str) -> Self {
        let ext = path::extname(absolute).to_string();
        Self {
            path: absolute.to_string(),
            dir: path::dirname(absolute).to_string(),
            name: path::basename(absolute, &ext).to_string(),
            ext,
        }
    }
}

/// A unit of content moving through the pipeline.
///
/// `id` never changes within a pass, even when a transform rewrites `ext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub id: AssetId,
    pub content: String,
    /// Current extension, including the dot
    pub ext: String,
    pub source: AssetSource,
    pub is_entry: bool,
    pub embedded: bool,
}

impl Asset {
    /// A file asset loaded from `absolute`.
    pub fn from_file(id: AssetId, absolute: &str, content: impl Into<String>) -> Self {
        let source = AssetSource::from_path(absolute);
        Self {
            id,
            content: content.into(),
            ext: source.ext.clone(),
            source,
            is_entry: false,
            embedded: false,
        }
    }

    /// A fragment extracted from a parent. The compiler fills in `source`.
    pub fn embedded(id: AssetId, ext: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            ext: ext.into(),
            source: AssetSource::default(),
            is_entry: false,
            embedded: true,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = ext.into();
        self
    }
}

/// Result of a transform: the asset itself plus any embedded children.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub asset: Asset,
    pub embedded: Vec<Asset>,
}

impl Transformed {
    pub fn with_embedded(asset: Asset, embedded: Vec<Asset>) -> Self {
        Self { asset, embedded }
    }
}

impl From<Asset> for Transformed {
    fn from(asset: Asset) -> Self {
        Self {
            asset,
            embedded: Vec::new(),
        }
    }
}

/// A dependency given either by id or by a path relative to the asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Id(AssetId),
    Path(String),
}

impl From<AssetId> for Reference {
    fn from(id: AssetId) -> Self {
        Self::Id(id)
    }
}

impl From<&AssetId> for Reference {
    fn from(id: &AssetId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<&str> for Reference {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Reference {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

fn resolve_reference(resolver: &IdResolver, asset: &Asset, reference: Reference) -> AssetId {
    match reference {
        Reference::Id(id) => id,
        Reference::Path(path) => resolver.path_to_id(&path, Some(&asset.source.dir)),
    }
}

// ============================================================================
// Contexts
// ============================================================================

/// Context for [`Plugin::transform`].
pub struct TransformContext<'a> {
    pub asset: Asset,
    pub report: Reporter,
    pub cache: PluginCache,
    pub(crate) resolver: &'a IdResolver,
    pub(crate) sources: &'a SourceStore,
    pub(crate) dependencies: &'a Mutex<Vec<AssetId>>,
}

impl TransformContext<'_> {
    /// Register an edge from this asset to `reference` and return its id.
    ///
    /// Paths resolve against the asset's source directory.
    pub fn add_dependency(&self, reference: impl Into<Reference>) -> AssetId {
        let id = self.resolve_id(reference);
        self.dependencies.lock().push(id.clone());
        id
    }

    pub fn resolve_id(&self, reference: impl Into<Reference>) -> AssetId {
        resolve_reference(self.resolver, &self.asset, reference.into())
    }

    /// Original content of another file, before any transform.
    ///
    /// `Ok(None)` when the file does not exist. A failing loader comes back as
    /// an error diagnostic carrying the file's path.
    pub async fn source_content(
        &self,
        reference: impl Into<Reference> + Send,
    ) -> Result<Option<String>> {
        let id = self.resolve_id(reference);
        self.sources.read(&id, self.resolver).await
    }
}

/// Context for [`Plugin::package`], [`Plugin::optimize`] and [`Plugin::write`].
pub struct PackageContext<'a> {
    pub asset: Asset,
    pub report: Reporter,
    pub cache: PluginCache,
    pub(crate) resolver: &'a IdResolver,
    pub(crate) resolve_map: &'a FxHashMap<AssetId, String>,
    pub(crate) packaged: &'a FxHashMap<AssetId, Asset>,
}

impl PackageContext<'_> {
    /// Final output path of a dependency, once it has been written.
    pub fn resolve_asset(&self, reference: impl Into<Reference>) -> Option<String> {
        let id = resolve_reference(self.resolver, &self.asset, reference.into());
        self.resolve_map.get(&id).cloned()
    }

    /// Packaged content of a dependency (embedded children included).
    pub fn asset_content(&self, reference: impl Into<Reference>) -> Option<String> {
        let id = resolve_reference(self.resolver, &self.asset, reference.into());
        self.packaged.get(&id).map(|asset| asset.content.clone())
    }
}

/// Context for [`Plugin::on_change`].
pub struct ChangeContext {
    pub asset: Asset,
    pub report: Reporter,
    pub cache: PluginCache,
}

/// Context for [`Plugin::cleanup`].
pub struct CleanupContext {
    pub report: Reporter,
    pub cache: PluginCache,
}

// ============================================================================
// Plugin
// ============================================================================

/// Pipeline capabilities a plugin may declare.
#[derive(EnumSetType, Debug)]
pub enum Stage {
    Transform,
    Package,
    Optimize,
    Write,
    Change,
    Cleanup,
}

/// A pipeline extension.
///
/// Every method has a pass-through default; [`Plugin::stages`] decides which
/// ones the compiler actually calls. Errors that are not already a
/// [`crate::TapeError`] become error diagnostics sourced to [`Plugin::name`].
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name. Also the cache namespace and diagnostic source.
    fn name(&self) -> &str;

    /// Extensions this plugin applies to. Empty means all.
    fn exts(&self) -> &[String] {
        &[]
    }

    fn stages(&self) -> EnumSet<Stage>;

    /// Convert syntax and discover dependencies.
    async fn transform(&self, cx: &TransformContext<'_>) -> anyhow::Result<Transformed> {
        Ok(cx.asset.clone().into())
    }

    /// Rewrite dependency references to their final locations.
    async fn package(&self, cx: &PackageContext<'_>) -> anyhow::Result<Asset> {
        Ok(cx.asset.clone())
    }

    /// Content-level post-processing.
    async fn optimize(&self, cx: &PackageContext<'_>) -> anyhow::Result<Asset> {
        Ok(cx.asset.clone())
    }

    /// Output path of the asset.
    async fn write(&self, cx: &PackageContext<'_>) -> anyhow::Result<String> {
        Ok(write::output_path(&cx.asset))
    }

    /// An asset this plugin processed was invalidated.
    async fn on_change(&self, _cx: &ChangeContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release held resources.
    async fn cleanup(&self, _cx: &CleanupContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn handles(&self, stage: Stage, ext: &str) -> bool {
        if !self.stages().contains(stage) {
            return false;
        }
        let exts = self.exts();
        ext.is_empty() || exts.is_empty() || exts.iter().any(|e| e == ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scoped(Vec<String>, EnumSet<Stage>);

    #[async_trait]
    impl Plugin for Scoped {
        fn name(&self) -> &str {
            "scoped"
        }
        fn exts(&self) -> &[String] {
            &self.0
        }
        fn stages(&self) -> EnumSet<Stage> {
            self.1
        }
    }

    #[test]
    fn test_handles_matches_exts() {
        let plugin = Scoped(vec![".css".into()], Stage::Transform | Stage::Package);
        assert!(plugin.handles(Stage::Transform, ".css"));
        assert!(plugin.handles(Stage::Package, ""));
        assert!(!plugin.handles(Stage::Transform, ".html"));
        assert!(!plugin.handles(Stage::Write, ".css"));
    }

    #[test]
    fn test_handles_without_exts_matches_all() {
        let plugin = Scoped(Vec::new(), EnumSet::only(Stage::Optimize));
        assert!(plugin.handles(Stage::Optimize, ".html"));
        assert!(plugin.handles(Stage::Optimize, ".whatever"));
        assert!(!plugin.handles(Stage::Transform, ".html"));
    }

    #[test]
    fn test_asset_source_from_path() {
        let asset = Asset::from_file(AssetId::new("x"), "/css/style.scss", "a {}");
        assert_eq!(asset.ext, ".scss");
        assert_eq!(asset.source.dir, "/css");
        assert_eq!(asset.source.name, "style");
        assert_eq!(asset.source.path, "/css/style.scss");
        assert!(!asset.embedded);

        let part = Asset::embedded(AssetId::new("x:0"), ".css", "b {}");
        assert!(part.embedded);
        assert_eq!(part.source, AssetSource::default());
    }
}
