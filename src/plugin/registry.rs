//! Plugin loading.
//!
//! A [`PluginLoader`] pairs a constructor with its TOML config. Loading runs
//! every constructor once, validates names and then completes the list:
//!
//! ```text
//! [tape-html]? [tape-css]? <user plugins...> [tape-write]?
//! ```
//!
//! The HTML and CSS defaults are prepended unless a user plugin already
//! carries their name; the write default is appended unless some plugin can
//! write.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::css::{self, CssPlugin};
use super::html::{self, HtmlPlugin};
use super::write::WritePlugin;
use super::{Plugin, Stage};
use crate::error::{Result, TapeError};

/// Builds a plugin from its config table.
pub type PluginConstructor =
    Arc<dyn Fn(&toml::Table) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// A constructor plus the config it is called with.
#[derive(Clone)]
pub struct PluginLoader {
    constructor: PluginConstructor,
    config: toml::Table,
}

impl PluginLoader {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(&toml::Table) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            config: toml::Table::new(),
        }
    }

    /// Wrap an existing instance. Every load yields the same instance.
    pub fn from_plugin(plugin: impl Plugin + 'static) -> Self {
        Self::from_arc(Arc::new(plugin))
    }

    pub fn from_arc(plugin: Arc<dyn Plugin>) -> Self {
        Self::new(move |_| Ok(Arc::clone(&plugin)))
    }

    pub fn with_config(mut self, config: toml::Table) -> Self {
        self.config = config;
        self
    }

    fn construct(&self) -> Result<Arc<dyn Plugin>> {
        (self.constructor)(&self.config).map_err(|err| {
            TapeError::validation(format!(
                "Invalid plugin. Plugin loader returned an error: {err:#}"
            ))
        })
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Construct, validate and complete the plugin list.
pub fn load_plugins(loaders: &[PluginLoader]) -> Result<Vec<Arc<dyn Plugin>>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::with_capacity(loaders.len() + 3);
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();

    for loader in loaders {
        let plugin = loader.construct()?;
        let name = plugin.name().trim();
        if name.is_empty() {
            return Err(TapeError::validation("Plugins must have a name"));
        }

        let count = seen.entry(name.to_string()).or_default();
        *count += 1;
        if *count > 1 {
            return Err(TapeError::validation(format!(
                "Plugin names must be unique: {name} appeared {count} times"
            )));
        }

        plugins.push(plugin);
    }

    let has = |name: &str| seen.contains_key(name);
    let mut loaded: Vec<Arc<dyn Plugin>> = Vec::with_capacity(plugins.len() + 3);
    if !has(html::NAME) {
        loaded.push(Arc::new(HtmlPlugin::default()));
    }
    if !has(css::NAME) {
        loaded.push(Arc::new(CssPlugin::default()));
    }

    let can_write = plugins.iter().any(|p| p.stages().contains(Stage::Write));
    loaded.extend(plugins);
    if !can_write {
        loaded.push(Arc::new(WritePlugin));
    }

    crate::debug!("plugins"; "loaded {}", loaded.iter().map(|p| p.name()).collect::<Vec<_>>().join(", "));
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use enumset::EnumSet;

    struct Named(&'static str, EnumSet<Stage>);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn stages(&self) -> EnumSet<Stage> {
            self.1
        }
    }

    fn named(name: &'static str) -> PluginLoader {
        PluginLoader::from_plugin(Named(name, EnumSet::only(Stage::Transform)))
    }

    fn names(plugins: &[Arc<dyn Plugin>]) -> Vec<&str> {
        plugins.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn test_defaults_are_injected() {
        let plugins = load_plugins(&[named("mine")]).unwrap();
        assert_eq!(names(&plugins), ["tape-html", "tape-css", "mine", "tape-write"]);
    }

    #[test]
    fn test_user_plugins_replace_defaults() {
        let plugins = load_plugins(&[
            PluginLoader::from_plugin(Named("tape-css", EnumSet::only(Stage::Transform))),
            PluginLoader::from_plugin(Named("writer", EnumSet::only(Stage::Write))),
        ])
        .unwrap();
        assert_eq!(names(&plugins), ["tape-html", "tape-css", "writer"]);
    }

    #[test]
    fn test_duplicate_names_fail() {
        let err = load_plugins(&[named("pluginName"), named("other"), named("pluginName")])
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Plugin names must be unique: pluginName appeared 2 times"
        );
    }

    #[test]
    fn test_missing_name_fails() {
        let err = load_plugins(&[named("  ")]).err().unwrap();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_constructor_error_fails() {
        let failing = PluginLoader::new(|_| anyhow::bail!("no config"));
        let err = load_plugins(&[failing]).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Invalid plugin. Plugin loader returned an error: no config"
        );
    }

    #[test]
    fn test_config_reaches_constructor() {
        let config: toml::Table = toml::from_str("ignore_missing_assets = true").unwrap();
        let plugins = load_plugins(&[html::loader().with_config(config)]).unwrap();
        assert_eq!(names(&plugins), ["tape-css", "tape-html", "tape-write"]);

        let bad: toml::Table = toml::from_str("nope = true").unwrap();
        assert!(load_plugins(&[html::loader().with_config(bad)]).is_err());
    }
}
