//! Error types.

use thiserror::Error;

use crate::reporter::Diagnostic;

pub type Result<T> = std::result::Result<T, TapeError>;

// ============================================================================
// TapeError
// ============================================================================

/// Everything that can make a construction, build or update fail.
#[derive(Debug, Clone, Error)]
pub enum TapeError {
    /// Bad entry, file or plugin shape. Raised before any asynchronous work.
    #[error("{0}")]
    Validation(String),

    /// An error-kind diagnostic: missing assets, plugin failures.
    // NOTE: No #[from] here - diagnostics must go through the reporter
    #[error("{}", .0.message)]
    Diagnostic(Box<Diagnostic>),

    /// The dependency graph is not a DAG. Holds the offending path.
    #[error("Dependency cycle found: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// The abort signal fired before a phase boundary.
    #[error("compilation aborted")]
    Aborted,

    /// The dev session loop has stopped.
    #[error("dev session is closed")]
    Closed,
}

impl TapeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// The diagnostic carried by this error, if it came from the reporter.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Diagnostic(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = TapeError::Cycle(vec!["/style.css".into(), "/style.css".into()]);
        let display = format!("{err}");
        assert!(display.to_lowercase().contains("cycle"));
        assert!(display.contains("/style.css -> /style.css"));
    }

    #[test]
    fn test_diagnostic_display_uses_message() {
        let err = TapeError::Diagnostic(Box::new(Diagnostic::error("Asset `/a.css` not found.")));
        assert_eq!(format!("{err}"), "Asset `/a.css` not found.");
        assert!(err.diagnostic().is_some());
        assert!(!err.is_aborted());
    }

    #[test]
    fn test_validation_display() {
        let err = TapeError::validation("\"/a>b\" is an invalid file path.");
        assert!(format!("{err}").contains("invalid"));
        assert!(TapeError::Aborted.is_aborted());
    }
}
