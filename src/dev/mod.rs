//! Development session.
//!
//! A single loop task owns the [`Tape`] and serializes everything:
//!
//! ```text
//! update()  ──► apply + invalidate ──► Update{ids}
//!                        │
//!                  debounce window
//!                        ▼
//!               Start ──► rebuild ──► End | Error
//! ```
//!
//! Compiles never overlap: updates sent during a pass wait in the command
//! queue and are applied after it. A failed pass keeps the previous context,
//! so the next edit recompiles from the last good state.

mod debounce;
pub mod messages;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::compiler::{Tape, Update};
use crate::config::DevOptions;
use crate::error::{Result, TapeError};
use crate::identity::AssetId;
use crate::reporter::Diagnostic;
use debounce::Debouncer;

pub use messages::{DevCommand, DevEvent, DevReport};

const COMMAND_QUEUE: usize = 64;

// =============================================================================
// State
// =============================================================================

/// Progress flags shared between the handle and the loop.
#[derive(Debug, Default)]
struct DevState {
    /// Commands sent but not yet applied
    pending: AtomicUsize,
    /// Ids waiting out the debounce window
    scheduled: AtomicBool,
    compiling: AtomicBool,
}

impl DevState {
    /// An update command was applied. A recompile it scheduled is flagged
    /// before the command stops counting as pending.
    fn applied(&self, scheduled: bool) {
        if scheduled {
            self.scheduled.store(true, Ordering::SeqCst);
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// A scheduled recompile started.
    fn compiling(&self) {
        self.compiling.store(true, Ordering::SeqCst);
        self.scheduled.store(false, Ordering::SeqCst);
    }

    fn compiled(&self) {
        self.compiling.store(false, Ordering::SeqCst);
    }

    fn is_busy(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
            || self.scheduled.load(Ordering::SeqCst)
            || self.compiling.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running dev session.
///
/// Dropping the handle stops the loop after disposing plugins.
#[derive(Debug)]
pub struct DevSession {
    commands: mpsc::Sender<DevCommand>,
    events: mpsc::UnboundedReceiver<DevEvent>,
    state: Arc<DevState>,
}

impl DevSession {
    /// Start the loop. The initial pass begins immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(tape: Tape, options: DevOptions) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events) = mpsc::unbounded_channel();
        let state = Arc::new(DevState::default());

        let session = DevLoop {
            tape,
            rx,
            events: events_tx,
            debouncer: Debouncer::new(options.debounce),
            state: Arc::clone(&state),
        };
        tokio::spawn(session.run());

        Self {
            commands,
            events,
            state,
        }
    }

    /// Apply a partial change. Resolves with the changed ids once applied;
    /// the recompile follows asynchronously.
    pub async fn update(&self, update: Update) -> Result<Vec<AssetId>> {
        let (reply, rx) = oneshot::channel();
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .commands
            .send(DevCommand::Update { update, reply })
            .await
            .is_err()
        {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(TapeError::Closed);
        }
        rx.await.map_err(|_| TapeError::Closed)?
    }

    /// Next lifecycle event, or `None` once the loop has stopped.
    pub async fn next_event(&mut self) -> Option<DevEvent> {
        self.events.recv().await
    }

    /// Whether an update or a pass is still in flight.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Dispose plugins and stop. Returns the diagnostics cleanup produced.
    pub async fn close(self) -> Result<Vec<Diagnostic>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(DevCommand::Close(reply))
            .await
            .map_err(|_| TapeError::Closed)?;
        rx.await.map_err(|_| TapeError::Closed)?
    }
}

// =============================================================================
// Loop
// =============================================================================

struct DevLoop {
    tape: Tape,
    rx: mpsc::Receiver<DevCommand>,
    events: mpsc::UnboundedSender<DevEvent>,
    debouncer: Debouncer,
    state: Arc<DevState>,
}

impl DevLoop {
    async fn run(mut self) {
        self.compile(true).await;

        loop {
            tokio::select! {
                biased; // apply updates before compiling

                command = self.rx.recv() => match command {
                    Some(DevCommand::Update { update, reply }) => self.on_update(update, reply).await,
                    Some(DevCommand::Close(reply)) => {
                        let _ = reply.send(self.tape.dispose().await);
                        break;
                    }
                    None => {
                        if let Err(err) = self.tape.dispose().await {
                            crate::log!("dev"; "cleanup failed: {}", err);
                        }
                        break;
                    }
                },

                _ = tokio::time::sleep(self.debouncer.sleep_duration()), if self.debouncer.has_pending() => {
                    if let Some(ids) = self.debouncer.take_if_ready() {
                        crate::debug!("dev"; "recompiling after {} changed", ids.len());
                        self.compile(false).await;
                    }
                }
            }
        }

        crate::debug!("dev"; "session closed");
    }

    async fn on_update(
        &mut self,
        update: Update,
        reply: oneshot::Sender<Result<Vec<AssetId>>>,
    ) {
        let result = self.tape.update(update).await;

        let ids = result.as_ref().ok().filter(|ids| !ids.is_empty());
        if let Some(ids) = ids {
            self.debouncer.add(ids);
        }
        self.state.applied(ids.is_some());
        if let Some(ids) = ids {
            self.emit(DevEvent::Update { ids: ids.clone() });
        }
        let _ = reply.send(result);
    }

    async fn compile(&mut self, initial: bool) {
        self.state.compiling();

        let started_at = Instant::now();
        self.emit(DevEvent::Start { started_at });
        let result = self.tape.rebuild().await;
        let ended_at = Instant::now();
        let is_latest =
            self.state.pending.load(Ordering::SeqCst) == 0 && !self.debouncer.has_pending();

        self.state.compiled();

        let event = match result {
            Ok(output) => {
                let report = DevReport {
                    started_at,
                    ended_at,
                    is_latest,
                    output,
                };
                if initial {
                    DevEvent::Ready(report)
                } else {
                    DevEvent::End(report)
                }
            }
            Err(error) => {
                crate::log!("dev"; "compile failed: {}", error);
                DevEvent::Error {
                    error,
                    started_at,
                    ended_at,
                    is_latest,
                }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: DevEvent) {
        crate::debug!("dev"; "{}", event.name());
        // a dropped receiver only means nobody is listening
        let _ = self.events.send(event);
    }
}
