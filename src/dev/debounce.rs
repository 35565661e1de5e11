//! Update coalescing.

use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use crate::identity::AssetId;

/// Collects changed ids until the quiet window has passed.
///
/// Pure timing and deduplication: applying updates and compiling is left to
/// the session loop.
#[derive(Debug)]
pub(super) struct Debouncer {
    /// Changed ids in arrival order, duplicates dropped
    ids: Vec<AssetId>,
    seen: FxHashSet<AssetId>,
    last_update: Option<Instant>,
    window: Duration,
}

impl Debouncer {
    pub(super) fn new(window: Duration) -> Self {
        Self {
            ids: Vec::new(),
            seen: FxHashSet::default(),
            last_update: None,
            window,
        }
    }

    /// Record changed ids and restart the quiet window.
    pub(super) fn add(&mut self, ids: &[AssetId]) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.ids.push(id.clone());
            }
        }
        self.last_update = Some(Instant::now());
    }

    pub(super) fn has_pending(&self) -> bool {
        !self.ids.is_empty()
    }

    pub(super) fn is_ready(&self) -> bool {
        let Some(last_update) = self.last_update else {
            return false;
        };
        last_update.elapsed() >= self.window && self.has_pending()
    }

    /// Take the collected ids once the window has passed.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<AssetId>> {
        if !self.is_ready() {
            return None;
        }
        self.seen.clear();
        self.last_update = None;
        Some(std::mem::take(&mut self.ids))
    }

    /// Time left until [`Self::is_ready`] can turn true.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(last_update) = self.last_update else {
            return Duration::from_secs(86400);
        };
        self.window
            .saturating_sub(last_update.elapsed())
            .max(Duration::from_millis(1))
    }
}
