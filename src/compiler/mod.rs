//! Compilation orchestrator.
//!
//! A pass walks two phases over the dependency graph:
//!
//! ```text
//! Idle ──► Transforming ──► Packaging ──► Done
//!               │               │
//!               └───────┬───────┘
//!                       ▼
//!                    Failed
//! ```
//!
//! - Transforming: breadth-first from the entry. Each asset is loaded,
//!   transformed, and its direct dependencies are queued. Embedded children
//!   go into a pool and are picked up when their parent's edge reaches them.
//! - Packaging: topological order over the entry and everything it reaches.
//!   Each asset is packaged, optimized and (unless embedded) written.
//!
//! A [`CompileContext`] from a previous pass can seed the next one: anything
//! still present in it is reused instead of processed again. [`Tape::update`]
//! purges exactly what a file change affects before the next pass.

pub mod context;
pub mod pipeline;


use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::config::{Config, DevOptions, FileMap};
use crate::dev::DevSession;
use crate::error::{Result, TapeError};
use crate::graph::NodeData;
use crate::identity::{AssetId, IdResolver};
use crate::plugin::registry::{PluginLoader, load_plugins};
use crate::plugin::{Asset, CacheStore, Plugin};
use crate::reporter::{Diagnostic, Reporter};
use crate::signal::AbortSignal;
use crate::utils::path;

pub use context::{CompileContext, SourceStore};
use pipeline::Pipeline;

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub content: String,
}

/// Result of a successful pass.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutput {
    /// Output path of the entry asset
    pub entry: String,
    /// Output path → content, for every written asset reachable from the entry
    pub files: BTreeMap<String, OutputFile>,
    /// Warnings and infos collected along the way
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutput {
    /// Content written for `path`.
    pub fn content(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.content.as_str())
    }
}

// ============================================================================
// Updates
// ============================================================================

/// A partial change to a running [`Tape`].
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub entry: Option<String>,
    pub plugins: Option<Vec<PluginLoader>>,
    /// `None` content deletes the file
    pub files: FileMap,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), Some(content.into()));
        self
    }

    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.files.insert(path.into(), None);
        self
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn plugins(mut self, plugins: Vec<PluginLoader>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none() && self.plugins.is_none() && self.files.is_empty()
    }

    /// Path checks, done before anything is applied.
    fn validate(&self) -> Result<()> {
        if let Some(entry) = &self.entry {
            path::validate_path(entry)?;
        }
        for file in self.files.keys() {
            path::validate_path(file)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tape
// ============================================================================

/// The bundler.
///
/// Construction validates the input and loads plugins synchronously; no file
/// is read until the first pass.
pub struct Tape {
    /// Absolute entry path
    entry: String,
    sources: SourceStore,
    plugins: Vec<Arc<dyn Plugin>>,
    resolver: IdResolver,
    cache: CacheStore,
    signal: Option<AbortSignal>,
    /// Last good context, reused by [`Tape::rebuild`]
    context: Option<CompileContext>,
}

impl std::fmt::Debug for Tape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tape")
            .field("entry", &self.entry)
            .field("sources", &self.sources)
            .field("plugins", &self.plugins().collect::<Vec<_>>())
            .field("context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

impl Tape {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let plugins = load_plugins(&config.plugins)?;
        let resolver = IdResolver::new();
        let sources = SourceStore::new(config.files, &resolver);

        Ok(Self {
            entry: path::resolve("/", &config.entry),
            sources,
            plugins,
            resolver,
            cache: CacheStore::new(),
            signal: config.signal,
            context: None,
        })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.name())
    }

    /// Context kept from the last successful [`Tape::rebuild`].
    pub fn context(&self) -> Option<&CompileContext> {
        self.context.as_ref()
    }

    /// One-shot production build. Plugins are cleaned up afterwards whether
    /// the pass succeeded or not.
    pub async fn build(&self) -> Result<BuildOutput> {
        let result = self.compile(None).await;
        let cleanup = self.cleanup().await;

        let (mut output, _) = result?;
        output.diagnostics.extend(cleanup?);
        Ok(output)
    }

    /// Incremental pass seeded with the last good context.
    ///
    /// On failure the previous context is kept for the next attempt.
    pub async fn rebuild(&mut self) -> Result<BuildOutput> {
        let (output, context) = self.compile(self.context.as_ref()).await?;
        self.context = Some(context);
        Ok(output)
    }

    /// Run one full pass. `previous` seeds the context.
    pub async fn compile(
        &self,
        previous: Option<&CompileContext>,
    ) -> Result<(BuildOutput, CompileContext)> {
        let started = Instant::now();
        let mut cx = previous.cloned().unwrap_or_default();
        let report = Reporter::new();
        let pipeline = self.pipeline(&report);
        let entry_id = self.resolver.path_to_id(&self.entry, None);

        self.check_signal()?;
        self.transform_phase(&pipeline, &mut cx, &entry_id).await?;

        self.check_signal()?;
        let written = self.package_phase(&pipeline, &mut cx, &entry_id).await?;

        cx.diagnostics.extend(report.release());

        let mut files = BTreeMap::new();
        for id in &written {
            if let (Some(asset), Some(path)) = (cx.packaged.get(id), cx.resolve_map.get(id)) {
                files.insert(
                    path.clone(),
                    OutputFile {
                        content: asset.content.clone(),
                    },
                );
            }
        }

        let entry = cx.resolve_map.get(&entry_id).cloned().ok_or_else(|| {
            report.raise(Diagnostic::error(format!(
                "Packaging: Asset `{}` not found.",
                self.entry
            )))
        })?;

        crate::debug!("compile"; "{} files in {:?}", files.len(), started.elapsed());
        let output = BuildOutput {
            entry,
            files,
            diagnostics: cx.diagnostics.clone(),
        };
        Ok((output, cx))
    }

    fn pipeline<'a>(&'a self, report: &'a Reporter) -> Pipeline<'a> {
        Pipeline {
            plugins: &self.plugins,
            resolver: &self.resolver,
            sources: &self.sources,
            cache: &self.cache,
            report,
        }
    }

    fn check_signal(&self) -> Result<()> {
        match &self.signal {
            Some(signal) => signal.check(),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn transform_phase(
        &self,
        pipeline: &Pipeline<'_>,
        cx: &mut CompileContext,
        entry_id: &AssetId,
    ) -> Result<()> {
        let mut pool = FxHashMap::default();
        let mut queue = VecDeque::from([entry_id.clone()]);
        let mut deferred: Vec<AssetId> = Vec::new();
        let mut count = 0usize;
        cx.graph.add_node(entry_id);

        loop {
            while let Some(id) = queue.pop_front() {
                if cx.transformed.contains_key(&id) {
                    continue;
                }

                let loaded = match pool.remove(&id) {
                    Some(asset) => Some(asset),
                    None => self.sources.load(&id, &self.resolver).await?,
                };
                let Some(mut asset) = loaded else {
                    // may still show up as an embedded child later in the pass
                    cx.graph.set_node_data(&id, NodeData { missing: true });
                    deferred.push(id);
                    continue;
                };

                asset.is_entry = &id == entry_id;
                cx.graph.set_node_data(&id, NodeData::default());

                let output = pipeline.transform(asset).await?;
                count += 1;
                for dependency in &output.dependencies {
                    cx.graph.add_dependency(&id, dependency);
                    queue.push_back(dependency.clone());
                }
                for part in output.embedded {
                    pool.insert(part.id.clone(), part);
                }
                cx.transformed.insert(id, output.asset);
            }

            deferred.retain(|id| !cx.transformed.contains_key(id));
            let (ready, unresolved): (Vec<_>, Vec<_>) =
                deferred.drain(..).partition(|id| pool.contains_key(id));
            if ready.is_empty() {
                if let Some(id) = unresolved.first() {
                    return Err(pipeline.report.raise(Diagnostic::error(format!(
                        "Transforming: Asset `{}` not found.",
                        self.resolver.id_to_path(id)
                    ))));
                }
                break;
            }
            queue.extend(ready);
            deferred = unresolved;
        }

        crate::debug!("transform"; "{} assets transformed, {} reused", count, cx.transformed.len() - count);
        Ok(())
    }

    /// Package, optimize and write in dependency order. Returns the ids of
    /// written assets reachable from the entry.
    async fn package_phase(
        &self,
        pipeline: &Pipeline<'_>,
        cx: &mut CompileContext,
        entry_id: &AssetId,
    ) -> Result<Vec<AssetId>> {
        let order = cx.graph.overall_order().map_err(|err| match err {
            TapeError::Cycle(ids) => TapeError::Cycle(
                ids.iter()
                    .map(|id| self.resolver.id_to_path(&AssetId::new(id.as_str())))
                    .collect(),
            ),
            other => other,
        })?;

        let mut reachable: FxHashSet<AssetId> =
            cx.graph.dependencies_of(entry_id).into_iter().collect();
        reachable.insert(entry_id.clone());

        let mut written = Vec::new();
        for id in order.into_iter().filter(|id| reachable.contains(id)) {
            if cx.graph.is_missing(&id) {
                crate::debug!("package"; "pruning missing {}", self.resolver.id_to_path(&id));
                cx.graph.remove_node(&id);
                continue;
            }

            if !cx.packaged.contains_key(&id) {
                let Some(mut asset) = cx.transformed.get(&id).cloned() else {
                    return Err(pipeline.report.raise(Diagnostic::error(format!(
                        "Packaging: Asset `{}` not found.",
                        self.resolver.id_to_path(&id)
                    ))));
                };
                asset.is_entry = &id == entry_id;

                let asset = pipeline.package(asset, &cx.resolve_map, &cx.packaged).await?;
                let asset = pipeline.optimize(asset, &cx.resolve_map, &cx.packaged).await?;
                if !asset.embedded {
                    let path = pipeline.write(&asset, &cx.resolve_map, &cx.packaged).await?;
                    cx.resolve_map.insert(id.clone(), path);
                }
                cx.packaged.insert(id.clone(), asset);
            }

            if cx.packaged.get(&id).is_some_and(|a| !a.embedded) {
                written.push(id);
            }
        }

        Ok(written)
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Apply a partial change and invalidate what it affects.
    ///
    /// Returns the ids whose source changed. Nothing is recompiled here; the
    /// next [`Tape::rebuild`] picks up the purged context.
    ///
    /// Sources and context are updated together before any plugin hook runs,
    /// so a failing `on_change` or `cleanup` still leaves the change applied.
    pub async fn update(&mut self, update: Update) -> Result<Vec<AssetId>> {
        update.validate()?;
        let plugins = update.plugins.as_deref().map(load_plugins).transpose()?;

        let mut changed = Vec::new();
        for (file, content) in update.files {
            if let Some(id) = self.sources.set(&file, content, &self.resolver) {
                changed.push(id);
            }
        }

        if let Some(entry) = update.entry {
            let entry = path::resolve("/", &entry);
            if entry != self.entry {
                self.entry = entry;
                changed.push(self.resolver.path_to_id(&self.entry, None));
            }
        }

        if plugins.is_some() {
            changed.push(self.resolver.path_to_id(&self.entry, None));
        }

        let mut seen = FxHashSet::default();
        changed.retain(|id| seen.insert(id.clone()));

        match plugins {
            Some(plugins) => {
                self.context = None;
                let cleanup = self.cleanup().await;
                self.plugins = plugins;
                let released = cleanup?;
                crate::debug!("update"; "plugins replaced, {} diagnostics released", released.len());
            }
            None => {
                let touched = self.invalidate(&changed);
                self.notify_change(&touched).await?;
            }
        }
        Ok(changed)
    }

    /// Purge `changed`, everything depending on it, and the embedded children
    /// of all of those from the kept context. Returns the purged assets.
    fn invalidate(&mut self, changed: &[AssetId]) -> Vec<Asset> {
        let Some(cx) = self.context.as_mut() else {
            return Vec::new();
        };

        let mut stale: Vec<AssetId> = Vec::new();
        let mut seen = FxHashSet::default();
        for id in changed.iter().filter(|id| cx.graph.has_node(id)) {
            let mut affected = vec![id.clone()];
            affected.extend(cx.graph.dependants_of(id));

            for asset in affected {
                let children: Vec<AssetId> = cx
                    .graph
                    .direct_dependencies_of(&asset)
                    .into_iter()
                    .filter(|dep| cx.is_embedded(dep))
                    .collect();
                for stale_id in std::iter::once(asset).chain(children) {
                    if seen.insert(stale_id.clone()) {
                        stale.push(stale_id);
                    }
                }
            }
        }

        let mut touched = Vec::with_capacity(stale.len());
        let mut stale_paths = FxHashSet::default();
        for id in &stale {
            if let Some(asset) = cx.transformed.get(id).or_else(|| cx.packaged.get(id)) {
                stale_paths.insert(asset.source.path.clone());
                touched.push(asset.clone());
            }
            cx.purge(id);
        }
        cx.diagnostics
            .retain(|d| d.path.as_ref().is_none_or(|p| !stale_paths.contains(p)));

        crate::debug_do! {
            let paths: Vec<String> = stale.iter().map(|id| self.resolver.id_to_path(id)).collect();
            crate::debug!("update"; "{} changed, invalidated [{}]", changed.len(), paths.join(", "));
        }
        touched
    }

    /// Tell plugins about purged assets through `on_change`.
    async fn notify_change(&mut self, touched: &[Asset]) -> Result<()> {
        let report = Reporter::new();
        let pipeline = self.pipeline(&report);
        for asset in touched {
            pipeline.notify_change(asset).await?;
        }

        let released = report.release();
        if let Some(cx) = self.context.as_mut() {
            cx.diagnostics.extend(released);
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn cleanup(&self) -> Result<Vec<Diagnostic>> {
        let report = Reporter::new();
        self.pipeline(&report).cleanup().await?;
        Ok(report.release())
    }

    /// Run every plugin's cleanup once and drop all cached state.
    pub async fn dispose(&mut self) -> Result<Vec<Diagnostic>> {
        let released = self.cleanup().await?;
        self.context = None;
        self.cache.clear();
        Ok(released)
    }

    /// Hand this instance to a development session.
    pub fn dev(self, options: DevOptions) -> DevSession {
        DevSession::spawn(self, options)
    }
}
