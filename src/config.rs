//! Construction input.
//!
//! - [`Config`]: entry, files, plugins and an optional abort signal
//! - [`FileSource`]: in-memory files, an async [`FileLoader`], or both
//! - [`DirectoryLoader`]: a [`FileLoader`] over a real directory
//! - [`Manifest`]: the same input declared in a `tape.toml`
//!
//! # Manifest
//!
//! ```toml
//! entry = "/index.html"
//!
//! [files."/index.html"]
//! content = "<link rel=\"stylesheet\" href=\"/style.css\">"
//!
//! [files."/style.css"]
//! content = "body { margin: 0; }"
//!
//! [files."/removed.css"]   # empty table: the file is absent
//!
//! [dev]
//! debounce_ms = 25
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::error::{Result, TapeError};
use crate::plugin::registry::PluginLoader;
use crate::signal::AbortSignal;
use crate::utils::path;

/// Path → content. `None` marks a file as absent.
pub type FileMap = BTreeMap<String, Option<String>>;

const DEFAULT_DEBOUNCE_MS: u64 = 25;
const PREVIEW_LEN: usize = 50;

// ============================================================================
// Errors
// ============================================================================

/// Failures while reading a manifest from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Manifest parsing error")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] TapeError),
}

// ============================================================================
// File sources
// ============================================================================

/// Asynchronous source of file contents.
///
/// `path` is always absolute and normalized (`/css/style.css`). Return
/// `Ok(None)` for a file that does not exist.
#[async_trait]
pub trait FileLoader: Send + Sync {
    async fn load(&self, path: &str) -> anyhow::Result<Option<String>>;
}

/// Where the compiler reads files from. Map entries shadow the loader.
#[derive(Clone, Default)]
pub struct FileSource {
    pub map: FileMap,
    pub loader: Option<Arc<dyn FileLoader>>,
}

impl FileSource {
    pub fn from_loader(loader: impl FileLoader + 'static) -> Self {
        Self {
            map: FileMap::new(),
            loader: Some(Arc::new(loader)),
        }
    }

    pub fn with_loader(mut self, loader: impl FileLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: Option<String>) {
        self.map.insert(path.into(), content);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.loader.is_none()
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("map", &self.map.keys().collect::<Vec<_>>())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

impl From<FileMap> for FileSource {
    fn from(map: FileMap) -> Self {
        Self { map, loader: None }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for FileSource {
    fn from(files: [(&str, &str); N]) -> Self {
        files
            .into_iter()
            .map(|(path, content)| (path.to_string(), Some(content.to_string())))
            .collect::<FileMap>()
            .into()
    }
}

/// Reads files beneath `root`. Virtual `/a/b.css` maps to `<root>/a/b.css`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn locate(&self, virtual_path: &str) -> Result<PathBuf> {
        path::validate_path(virtual_path)?;
        let relative = path::resolve("/", virtual_path);
        Ok(self.root.join(relative.trim_start_matches('/')))
    }
}

#[async_trait]
impl FileLoader for DirectoryLoader {
    async fn load(&self, virtual_path: &str) -> anyhow::Result<Option<String>> {
        let file = self.locate(virtual_path)?;
        match tokio::fs::read_to_string(&file).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow::Error::new(err).context(format!("reading {}", file.display()))),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// Input to [`crate::Tape::new`].
#[derive(Clone, Default)]
pub struct Config {
    pub entry: String,
    pub files: FileSource,
    pub plugins: Vec<PluginLoader>,
    pub signal: Option<AbortSignal>,
}

impl Config {
    pub fn new(entry: impl Into<String>, files: impl Into<FileSource>) -> Self {
        Self {
            entry: entry.into(),
            files: files.into(),
            plugins: Vec::new(),
            signal: None,
        }
    }

    pub fn plugin(mut self, loader: PluginLoader) -> Self {
        self.plugins.push(loader);
        self
    }

    pub fn plugins(mut self, loaders: impl IntoIterator<Item = PluginLoader>) -> Self {
        self.plugins.extend(loaders);
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Synchronous shape checks: entry present, every path a valid file path.
    ///
    /// An empty file set is accepted; the entry then fails as not found.
    pub fn validate(&self) -> Result<()> {
        if self.entry.trim().is_empty() {
            return Err(TapeError::validation("`entry` is required"));
        }
        path::validate_path(&self.entry)?;
        for file in self.files.map.keys() {
            path::validate_path(file)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("entry", &self.entry)
            .field("files", &self.files)
            .field("plugins", &self.plugins.len())
            .field("signal", &self.signal.is_some())
            .finish()
    }
}

/// Options for [`crate::Tape::dev`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevOptions {
    /// Quiet period used to coalesce bursts of updates
    pub debounce: Duration,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

// ============================================================================
// Manifest
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    files: toml::Table,
    #[serde(default)]
    dev: RawDev,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDev {
    debounce_ms: Option<u64>,
}

/// Build input declared in TOML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub entry: String,
    pub files: FileMap,
    pub dev: DevOptions,
}

impl Manifest {
    /// Parse and validate a manifest document.
    pub fn parse(content: &str) -> std::result::Result<Self, ConfigError> {
        let raw: RawManifest = toml::from_str(content)?;

        let entry = raw
            .entry
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| TapeError::validation("`entry` is required"))?;
        path::validate_path(&entry)?;

        let mut files = FileMap::new();
        for (file, value) in raw.files {
            path::validate_path(&file)?;
            let content = parse_file_value(&value)?;
            files.insert(file, content);
        }

        let dev = DevOptions {
            debounce: Duration::from_millis(raw.dev.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
        };

        Ok(Self { entry, files, dev })
    }

    pub async fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::parse(&content)
    }

    pub fn into_config(self) -> Config {
        Config::new(self.entry, self.files)
    }
}

/// An empty table is an absent file; `{ content = "..." }` is a file.
fn parse_file_value(value: &toml::Value) -> Result<Option<String>> {
    if let toml::Value::Table(table) = value {
        if table.is_empty() {
            return Ok(None);
        }
        if table.len() == 1
            && let Some(toml::Value::String(content)) = table.get("content")
        {
            return Ok(Some(content.clone()));
        }
    }

    Err(TapeError::validation(format!(
        "Given an invalid file: {}",
        preview(&value.to_string())
    )))
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_LEN).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parse() {
        let manifest = Manifest::parse(
            r#"
            entry = "/index.html"

            [files."/index.html"]
            content = "<p>hi</p>"

            [files."/gone.css"]

            [dev]
            debounce_ms = 5
            "#,
        )
        .unwrap();

        assert_eq!(manifest.entry, "/index.html");
        assert_eq!(manifest.files["/index.html"].as_deref(), Some("<p>hi</p>"));
        assert_eq!(manifest.files["/gone.css"], None);
        assert_eq!(manifest.dev.debounce, Duration::from_millis(5));
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest = Manifest::parse("entry = \"index.html\"").unwrap();
        assert!(manifest.files.is_empty());
        assert_eq!(manifest.dev, DevOptions::default());
    }

    #[test]
    fn test_manifest_rejects_bad_file_shape() {
        let err = Manifest::parse(
            r#"
            entry = "/index.html"
            [files."/index.html"]
            bad = "key"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid"));

        let err = Manifest::parse(
            r#"
            entry = "/index.html"
            files = { "/index.html" = "plain string" }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Given an invalid file"));
    }

    #[test]
    fn test_manifest_requires_entry() {
        let err = Manifest::parse("[files]").unwrap_err();
        assert!(err.to_string().contains("entry"));
    }

    #[test]
    fn test_manifest_rejects_invalid_paths() {
        let err = Manifest::parse(
            r#"
            entry = "/index.html"
            [files."/ind*ex.html"]
            content = "x"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid file path"));
    }

    #[test]
    fn test_config_validate() {
        assert!(Config::new("/index.html", [("/index.html", "x")]).validate().is_ok());

        let err = Config::new("", FileSource::default()).validate().unwrap_err();
        assert_eq!(err.to_string(), "`entry` is required");

        let err = Config::new("invalid-pat>h", FileSource::default()).validate().unwrap_err();
        assert!(err.to_string().contains("invalid"));

        assert!(Config::new("/index.html", FileSource::default()).validate().is_ok());

        let err = Config::new("/index.html", [("/a/b:c.css", "x")]).validate().unwrap_err();
        assert!(err.to_string().contains("invalid file path"));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
    }

    #[tokio::test]
    async fn test_directory_loader() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("css")).unwrap();
        std::fs::write(temp.path().join("css/style.css"), "body {}").unwrap();

        let loader = DirectoryLoader::new(temp.path());
        assert_eq!(
            loader.load("/css/style.css").await.unwrap().as_deref(),
            Some("body {}")
        );
        assert_eq!(loader.load("/css/missing.css").await.unwrap(), None);
        assert!(loader.load("/a>b.css").await.is_err());
    }

    #[tokio::test]
    async fn test_manifest_load_from_disk() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("tape.toml");
        std::fs::write(&file, "entry = \"/index.html\"\n").unwrap();

        let manifest = Manifest::load(&file).await.unwrap();
        assert_eq!(manifest.into_config().entry, "/index.html");

        let err = Manifest::load(&temp.path().join("missing.toml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
