//! Logging utilities with colored output.
//!
//! This module provides:
//! - `log!` macro for formatted output with colored prefixes
//! - `debug!` macro for verbose-only output
//! - `debug_do!` for blocks that only run in verbose mode
//!
//! # Example
//!
//! ```ignore
//! log!("dev"; "rebuild failed: {}", err);
//! debug!("transform"; "{} assets queued", count);
//! ```
//!
//! All output goes to stderr, so a host program keeps stdout for itself.

use owo_colors::OwoColorize;
use std::{
    io::{Write, stderr},
    sync::atomic::{AtomicBool, Ordering},
};

/// Global verbose flag
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Set verbose mode globally
pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::SeqCst);
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

// ============================================================================
// Log Macros
// ============================================================================

/// Log a message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a debug message (only shown when verbose mode is enabled)
///
/// # Usage
/// ```ignore
/// debug!("module"; "debug info: {}", value);
/// ```
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

/// Execute code only when verbose mode is enabled
///
/// Use this to avoid computing expensive debug data when not needed.
///
/// # Usage
/// ```ignore
/// debug_do! {
///     let summary = expensive_computation();
///     debug!("module"; "result: {:?}", summary);
/// }
/// ```
#[macro_export]
macro_rules! debug_do {
    ($($body:tt)*) => {{
        if $crate::logger::is_verbose() {
            $($body)*
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix
#[inline]
pub fn log(module: &str, message: &str) {
    let module_lower = module.to_ascii_lowercase();
    let prefix = colorize_prefix(module, &module_lower);

    let mut out = stderr().lock();
    writeln!(out, "{prefix} {message}").ok();
    out.flush().ok();
}

/// Apply color to a module prefix based on module type
#[inline]
fn colorize_prefix(module: &str, module_lower: &str) -> String {
    let prefix = format!("[{module}]");
    match module_lower {
        "dev" => prefix.bright_blue().bold().to_string(),
        "package" | "write" => prefix.bright_green().bold().to_string(),
        "error" => prefix.bright_red().bold().to_string(),
        "warning" => prefix.yellow().bold().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_prefix_wraps_module() {
        owo_colors::set_override(false);
        assert_eq!(colorize_prefix("dev", "dev"), "[dev]");
        assert_eq!(colorize_prefix("Transform", "transform"), "[Transform]");
        owo_colors::unset_override();
    }

    #[test]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
