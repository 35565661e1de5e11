//! Diagnostic collection for a compilation pass.
//!
//! A [`Reporter`] is handed to every plugin call. Reporting a diagnostic whose
//! kind is [`DiagnosticKind::Error`] never stores it: the call returns
//! `Err(TapeError::Diagnostic)` and the pass aborts. Warnings and infos are
//! appended in order and drained with [`Reporter::release`].
//!
//! Scoped reporters created with [`Reporter::with_path`] and
//! [`Reporter::with_source`] share the same storage and stamp their scope onto
//! everything reported through them, overriding what the caller set.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TapeError};

const DEFAULT_SOURCE: &str = "internal";
const DEFAULT_MESSAGE: &str = "An unknown error occurred.";

// ============================================================================
// Diagnostic
// ============================================================================

/// Severity of a diagnostic.
///
/// Unknown names deserialize to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DiagnosticKind {
    #[default]
    Error,
    Warning,
    Info,
}

impl DiagnosticKind {
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "warning" => Self::Warning,
            "info" => Self::Info,
            _ => Self::Error,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl From<String> for DiagnosticKind {
    fn from(name: String) -> Self {
        Self::parse_lossy(&name)
    }
}

/// A 1-indexed line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    const fn is_valid(&self) -> bool {
        self.line > 0 && self.column > 0
    }
}

/// Source range of a diagnostic. `end` is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub start: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
}

/// A structured error/warning/info record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnostic {
    #[serde(rename = "type")]
    pub kind: DiagnosticKind,
    /// Plugin name, or `internal` for the core
    pub source: String,
    pub path: Option<String>,
    pub message: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::location"
    )]
    pub loc: Option<Location>,
    /// Replacement text for `loc` that fixes the problem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl Default for Diagnostic {
    fn default() -> Self {
        Self {
            kind: DiagnosticKind::Error,
            source: DEFAULT_SOURCE.to_string(),
            path: None,
            message: DEFAULT_MESSAGE.to_string(),
            loc: None,
            fix: None,
        }
    }
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Info, message)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Point at a 1-indexed line and column.
    pub fn with_loc(mut self, line: usize, column: usize) -> Self {
        self.loc = Some(Location {
            start: Position::new(line, column),
            end: None,
        });
        self
    }

    pub fn with_range(mut self, start: Position, end: Position) -> Self {
        self.loc = Some(Location {
            start,
            end: Some(end),
        });
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == DiagnosticKind::Error
    }

    /// Fill blank fields with defaults and drop unusable locations.
    fn normalize(mut self) -> Self {
        if self.source.trim().is_empty() {
            self.source = DEFAULT_SOURCE.to_string();
        }
        if self.message.trim().is_empty() {
            self.message = DEFAULT_MESSAGE.to_string();
        }
        if let Some(loc) = &mut self.loc {
            if !loc.start.is_valid() {
                self.loc = None;
            } else if loc.end.is_some_and(|end| !end.is_valid()) {
                loc.end = None;
            }
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.kind.as_str(), self.source)?;
        if let Some(path) = &self.path {
            write!(f, " {path}")?;
            if let Some(loc) = &self.loc {
                write!(f, ":{}:{}", loc.start.line, loc.start.column)?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

/// Deserializers that drop malformed data instead of failing.
mod lenient {
    use serde::{Deserialize, Deserializer};

    use super::{Location, Position};

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct RawPosition {
        line: Option<usize>,
        column: Option<usize>,
    }

    impl RawPosition {
        fn into_position(self) -> Option<Position> {
            Some(Position::new(self.line?, self.column?))
        }
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct RawLocation {
        start: Option<RawPosition>,
        end: Option<RawPosition>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeLocation {
        Location(RawLocation),
        Other(serde::de::IgnoredAny),
    }

    pub(super) fn location<'de, D>(deserializer: D) -> Result<Option<Location>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<MaybeLocation>::deserialize(deserializer)?;
        let Some(MaybeLocation::Location(raw)) = raw else {
            return Ok(None);
        };
        let Some(start) = raw.start.and_then(RawPosition::into_position) else {
            return Ok(None);
        };
        Ok(Some(Location {
            start,
            end: raw.end.and_then(RawPosition::into_position),
        }))
    }
}

// ============================================================================
// Reporter
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Scope {
    path: Option<String>,
    source: Option<String>,
}

/// Collects diagnostics for one compilation pass.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
    scope: Scope,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter sharing this storage that stamps `path` onto every report.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let mut scoped = self.clone();
        scoped.scope.path = Some(path.into());
        scoped
    }

    /// A reporter sharing this storage that stamps `source` onto every report.
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        let mut scoped = self.clone();
        scoped.scope.source = Some(source.into());
        scoped
    }

    /// Record a diagnostic. Error-kind diagnostics come back as `Err`.
    pub fn report(&self, diagnostic: Diagnostic) -> Result<()> {
        let diagnostic = self.stamp(diagnostic);

        if diagnostic.is_error() {
            return Err(TapeError::Diagnostic(Box::new(diagnostic)));
        }

        crate::debug!("report"; "{}", diagnostic);
        self.diagnostics.lock().push(diagnostic);
        Ok(())
    }

    /// Report as an error. Always returns `Err`.
    pub fn error(&self, diagnostic: Diagnostic) -> Result<()> {
        Err(self.raise(diagnostic))
    }

    /// Turn a diagnostic into the error it would raise, scope applied.
    pub fn raise(&self, mut diagnostic: Diagnostic) -> TapeError {
        diagnostic.kind = DiagnosticKind::Error;
        TapeError::Diagnostic(Box::new(self.stamp(diagnostic)))
    }

    pub fn warning(&self, mut diagnostic: Diagnostic) {
        diagnostic.kind = DiagnosticKind::Warning;
        // non-error kinds never fail
        let _ = self.report(diagnostic);
    }

    pub fn info(&self, mut diagnostic: Diagnostic) {
        diagnostic.kind = DiagnosticKind::Info;
        let _ = self.report(diagnostic);
    }

    fn stamp(&self, mut diagnostic: Diagnostic) -> Diagnostic {
        if let Some(path) = &self.scope.path {
            diagnostic.path = Some(path.clone());
        }
        if let Some(source) = &self.scope.source {
            diagnostic.source = source.clone();
        }
        diagnostic.normalize()
    }

    /// Drain everything reported so far.
    pub fn release(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock())
    }

    pub fn len(&self) -> usize {
        self.diagnostics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_raised_not_stored() {
        let reporter = Reporter::new();
        let err = reporter
            .report(Diagnostic::error("boom").with_path("/index.html"))
            .unwrap_err();

        let diagnostic = err.diagnostic().unwrap();
        assert_eq!(diagnostic.message, "boom");
        assert_eq!(diagnostic.path.as_deref(), Some("/index.html"));
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_warnings_accumulate_in_order() {
        let reporter = Reporter::new();
        reporter.warning(Diagnostic::warning("first"));
        reporter.info(Diagnostic::info("second"));

        let released = reporter.release();
        assert_eq!(released.len(), 2);
        assert_eq!(released[0].message, "first");
        assert_eq!(released[1].kind, DiagnosticKind::Info);
        assert!(reporter.release().is_empty());
    }

    #[test]
    fn test_defaults_fill_blank_fields() {
        let reporter = Reporter::new();
        reporter.warning(Diagnostic::warning("").with_source(""));

        let released = reporter.release();
        assert_eq!(released[0].source, "internal");
        assert_eq!(released[0].message, "An unknown error occurred.");
        assert_eq!(released[0].path, None);
        assert_eq!(Diagnostic::default().kind, DiagnosticKind::Error);
    }

    #[test]
    fn test_scope_overrides_fields() {
        let reporter = Reporter::new();
        let scoped = reporter.with_path("/style.css").with_source("tape-css");
        scoped.warning(
            Diagnostic::warning("unused")
                .with_path("/other.css")
                .with_source("someone"),
        );

        let released = reporter.release();
        assert_eq!(released[0].path.as_deref(), Some("/style.css"));
        assert_eq!(released[0].source, "tape-css");
    }

    #[test]
    fn test_error_helper_forces_kind() {
        let reporter = Reporter::new();
        assert!(reporter.error(Diagnostic::info("nope")).is_err());
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_raise_applies_scope() {
        let reporter = Reporter::new().with_source("tape-html");
        let err = reporter.raise(Diagnostic::warning("broken"));
        let diagnostic = err.diagnostic().unwrap();
        assert!(diagnostic.is_error());
        assert_eq!(diagnostic.source, "tape-html");
    }

    #[test]
    fn test_invalid_location_is_stripped() {
        let reporter = Reporter::new();
        reporter.warning(Diagnostic::warning("zero line").with_loc(0, 4));
        reporter.warning(Diagnostic::warning("valid").with_loc(3, 1));

        let released = reporter.release();
        assert_eq!(released[0].loc, None);
        assert_eq!(released[1].loc.unwrap().start, Position::new(3, 1));
    }

    #[test]
    fn test_deserialize_normalizes_kind_and_loc() {
        let raw = r#"{ "type": "fatal", "message": "x", "loc": { "start": { "line": 2 } } }"#;
        let diagnostic: Diagnostic = serde_json::from_str(raw).unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::Error);
        assert_eq!(diagnostic.loc, None);
        assert_eq!(diagnostic.source, "internal");

        let raw = r#"{ "type": "warning", "loc": "bogus" }"#;
        let diagnostic: Diagnostic = serde_json::from_str(raw).unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::Warning);
        assert_eq!(diagnostic.loc, None);

        let raw = r#"{ "type": "info", "loc": { "start": { "line": 2, "column": 5 } } }"#;
        let diagnostic: Diagnostic = serde_json::from_str(raw).unwrap();
        assert_eq!(diagnostic.loc.unwrap().start, Position::new(2, 5));
    }

    #[test]
    fn test_display() {
        let diagnostic = Diagnostic::warning("unused selector")
            .with_path("/a.css")
            .with_source("tape-css")
            .with_loc(4, 2);
        assert_eq!(
            diagnostic.to_string(),
            "warning [tape-css] /a.css:4:2: unused selector"
        );
    }
}
