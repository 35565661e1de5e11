//! Dev session message definitions.
//!
//! ```text
//! DevSession --DevCommand--> session loop --DevEvent--> DevSession::next_event
//! ```

use std::time::Instant;

use tokio::sync::oneshot;

use crate::compiler::{BuildOutput, Update};
use crate::error::{Result, TapeError};
use crate::identity::AssetId;
use crate::reporter::Diagnostic;

// =============================================================================
// Commands
// =============================================================================

/// Requests from the session handle to the loop.
#[derive(Debug)]
pub enum DevCommand {
    /// Apply a partial change; replies with the changed ids
    Update {
        update: Update,
        reply: oneshot::Sender<Result<Vec<AssetId>>>,
    },
    /// Dispose plugins and stop the loop
    Close(oneshot::Sender<Result<Vec<Diagnostic>>>),
}

// =============================================================================
// Events
// =============================================================================

/// A finished pass.
#[derive(Debug, Clone)]
pub struct DevReport {
    pub started_at: Instant,
    pub ended_at: Instant,
    /// No update arrived while this pass ran
    pub is_latest: bool,
    pub output: BuildOutput,
}

/// Lifecycle notifications, in the order they happen.
#[derive(Debug, Clone)]
pub enum DevEvent {
    /// A pass began
    Start { started_at: Instant },
    /// The initial pass succeeded
    Ready(DevReport),
    /// A pass triggered by updates succeeded
    End(DevReport),
    /// An update changed these ids; a pass will follow once updates settle
    Update { ids: Vec<AssetId> },
    /// A pass failed. The last good state is kept for the next one.
    Error {
        error: TapeError,
        started_at: Instant,
        ended_at: Instant,
        is_latest: bool,
    },
}

impl DevEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Ready(_) => "ready",
            Self::End(_) => "end",
            Self::Update { .. } => "update",
            Self::Error { .. } => "error",
        }
    }

    /// Output of a successful pass.
    pub fn output(&self) -> Option<&BuildOutput> {
        match self {
            Self::Ready(report) | Self::End(report) => Some(&report.output),
            _ => None,
        }
    }
}
