//! Per-asset stage dispatch.
//!
//! ```text
//! transform   every matching plugin, restarting on ext change
//! package     every matching plugin, each fed the previous output
//! optimize    every matching plugin, each fed the previous output
//! write       first matching plugin only
//! on_change   every matching plugin
//! cleanup     every plugin with the stage, ext ignored
//! ```
//!
//! Plugin failures that are not already a [`TapeError`] are raised as error
//! diagnostics sourced to the failing plugin.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::context::SourceStore;
use crate::error::{Result, TapeError};
use crate::identity::{AssetId, IdResolver};
use crate::plugin::{
    Asset, CacheStore, ChangeContext, CleanupContext, PackageContext, Plugin, Stage,
    TransformContext, Transformed, write,
};
use crate::reporter::{Diagnostic, Reporter};

/// Type-changing restarts allowed before a transform chain is considered stuck.
const MAX_TRANSFORM_RESTARTS: usize = 16;

/// What transforming one asset produced.
#[derive(Debug)]
pub struct TransformOutput {
    pub asset: Asset,
    pub embedded: Vec<Asset>,
    /// Direct dependencies in registration order, duplicates removed
    pub dependencies: Vec<AssetId>,
}

/// Borrowed view of everything the stages need.
pub struct Pipeline<'a> {
    pub plugins: &'a [Arc<dyn Plugin>],
    pub resolver: &'a IdResolver,
    pub sources: &'a SourceStore,
    pub cache: &'a CacheStore,
    pub report: &'a Reporter,
}

impl Pipeline<'_> {
    fn matching(&self, stage: Stage, ext: &str) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        let ext = ext.to_string();
        self.plugins.iter().filter(move |p| p.handles(stage, &ext))
    }

    /// Reporter for `asset`, attributed to `plugin`.
    fn scoped(&self, asset: &Asset, plugin: &dyn Plugin) -> Reporter {
        self.report
            .with_path(asset.source.path.clone())
            .with_source(plugin.name())
    }

    // ========================================================================
    // Transform
    // ========================================================================

    pub async fn transform(&self, asset: Asset) -> Result<TransformOutput> {
        let dependencies = Mutex::new(Vec::new());
        let mut embedded = Vec::new();
        let mut current = asset;
        let mut restarts = 0;

        'chain: loop {
            let ext = current.ext.clone();
            for plugin in self.matching(Stage::Transform, &ext) {
                let cx = TransformContext {
                    asset: current.clone(),
                    report: self.scoped(&current, plugin.as_ref()),
                    cache: self.cache.namespace(plugin.name()),
                    resolver: self.resolver,
                    sources: self.sources,
                    dependencies: &dependencies,
                };
                let Transformed { asset: next, embedded: parts } = plugin
                    .transform(&cx)
                    .await
                    .map_err(|err| plugin_error(&cx.report, err))?;

                embedded.extend(parts);
                current = Asset {
                    id: current.id,
                    is_entry: current.is_entry,
                    embedded: current.embedded,
                    ..next
                };

                if current.ext != ext {
                    restarts += 1;
                    if restarts > MAX_TRANSFORM_RESTARTS {
                        return Err(self.report.with_path(current.source.path.clone()).raise(
                            Diagnostic::error(format!(
                                "Transforming: `{}` changed type more than {MAX_TRANSFORM_RESTARTS} times.",
                                current.source.path
                            )),
                        ));
                    }
                    crate::debug!("transform"; "{} {} -> {}, restarting", current.source.path, ext, current.ext);
                    continue 'chain;
                }
            }
            break;
        }

        // children resolve relative paths against the parent's location
        for part in &mut embedded {
            part.source = current.source.clone();
            part.embedded = true;
            part.is_entry = false;
        }

        let mut seen = FxHashSet::default();
        let dependencies = dependencies
            .into_inner()
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Ok(TransformOutput {
            asset: current,
            embedded,
            dependencies,
        })
    }

    // ========================================================================
    // Package, optimize, write
    // ========================================================================

    fn package_context<'c>(
        &'c self,
        asset: Asset,
        plugin: &dyn Plugin,
        resolve_map: &'c FxHashMap<AssetId, String>,
        packaged: &'c FxHashMap<AssetId, Asset>,
    ) -> PackageContext<'c> {
        PackageContext {
            report: self.scoped(&asset, plugin),
            cache: self.cache.namespace(plugin.name()),
            resolver: self.resolver,
            resolve_map,
            packaged,
            asset,
        }
    }

    /// Fold `asset` through every matching plugin of `stage`.
    async fn fold(
        &self,
        stage: Stage,
        mut asset: Asset,
        resolve_map: &FxHashMap<AssetId, String>,
        packaged: &FxHashMap<AssetId, Asset>,
    ) -> Result<Asset> {
        for plugin in self.plugins {
            if !plugin.handles(stage, &asset.ext) {
                continue;
            }
            let id = asset.id.clone();
            let cx = self.package_context(asset, plugin.as_ref(), resolve_map, packaged);
            let result = match stage {
                Stage::Optimize => plugin.optimize(&cx).await,
                _ => plugin.package(&cx).await,
            };
            let mut next = result.map_err(|err| plugin_error(&cx.report, err))?;
            next.id = id;
            asset = next;
        }
        Ok(asset)
    }

    pub async fn package(
        &self,
        asset: Asset,
        resolve_map: &FxHashMap<AssetId, String>,
        packaged: &FxHashMap<AssetId, Asset>,
    ) -> Result<Asset> {
        self.fold(Stage::Package, asset, resolve_map, packaged).await
    }

    pub async fn optimize(
        &self,
        asset: Asset,
        resolve_map: &FxHashMap<AssetId, String>,
        packaged: &FxHashMap<AssetId, Asset>,
    ) -> Result<Asset> {
        self.fold(Stage::Optimize, asset, resolve_map, packaged).await
    }

    /// Output path of `asset`, from the first plugin able to write it.
    pub async fn write(
        &self,
        asset: &Asset,
        resolve_map: &FxHashMap<AssetId, String>,
        packaged: &FxHashMap<AssetId, Asset>,
    ) -> Result<String> {
        let Some(plugin) = self.matching(Stage::Write, &asset.ext).next() else {
            return Ok(write::output_path(asset));
        };
        let cx = self.package_context(asset.clone(), plugin.as_ref(), resolve_map, packaged);
        plugin
            .write(&cx)
            .await
            .map_err(|err| plugin_error(&cx.report, err))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Tell plugins handling `asset` that it was invalidated.
    pub async fn notify_change(&self, asset: &Asset) -> Result<()> {
        for plugin in self.matching(Stage::Change, &asset.ext) {
            let cx = ChangeContext {
                asset: asset.clone(),
                report: self.scoped(asset, plugin.as_ref()),
                cache: self.cache.namespace(plugin.name()),
            };
            plugin
                .on_change(&cx)
                .await
                .map_err(|err| plugin_error(&cx.report, err))?;
        }
        Ok(())
    }

    pub async fn cleanup(&self) -> Result<()> {
        for plugin in self.plugins {
            if !plugin.stages().contains(Stage::Cleanup) {
                continue;
            }
            let cx = CleanupContext {
                report: self.report.with_source(plugin.name()),
                cache: self.cache.namespace(plugin.name()),
            };
            plugin
                .cleanup(&cx)
                .await
                .map_err(|err| plugin_error(&cx.report, err))?;
        }
        Ok(())
    }
}

/// Keep tagged errors as they are, wrap everything else.
fn plugin_error(report: &Reporter, err: anyhow::Error) -> TapeError {
    match err.downcast::<TapeError>() {
        Ok(err) => err,
        Err(err) => report.raise(Diagnostic::error(format!("{err:#}"))),
    }
}
