//! Tape - an in-memory, plugin-extensible bundler for HTML documents and
//! their dependencies.
//!
//! ```ignore
//! use tape::{Config, Tape};
//!
//! let tape = Tape::new(Config::new(
//!     "/index.html",
//!     [
//!         ("/index.html", r#"<link rel="stylesheet" href="style.css">"#),
//!         ("/style.css", "body { margin: 0; }"),
//!     ],
//! ))?;
//! let output = tape.build().await?;
//! assert!(output.files.contains_key(&output.entry));
//! ```
//!
//! - [`compiler`]: the orchestrator and per-asset pipeline
//! - [`plugin`]: plugin contract, registry and built-in plugins
//! - [`dev`]: incremental development session
//! - [`config`]: construction input and TOML manifest

pub mod compiler;
pub mod config;
pub mod dev;
pub mod error;
pub mod graph;
pub mod identity;
pub mod logger;
pub mod plugin;
pub mod reporter;
pub mod signal;
pub mod utils;

pub use compiler::{BuildOutput, CompileContext, OutputFile, Tape, Update};
pub use config::{
    Config, ConfigError, DevOptions, DirectoryLoader, FileLoader, FileMap, FileSource, Manifest,
};
pub use dev::{DevEvent, DevReport, DevSession};
pub use error::{Result, TapeError};
pub use identity::AssetId;
pub use plugin::{
    Asset, AssetSource, ChangeContext, CleanupContext, PackageContext, Plugin, PluginCache,
    PluginLoader, Stage, TransformContext, Transformed,
};
pub use reporter::{Diagnostic, DiagnosticKind, Location, Position, Reporter};
pub use signal::{AbortController, AbortSignal};
