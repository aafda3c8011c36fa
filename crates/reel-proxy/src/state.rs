//! Process-wide proxy state shared by every request handler.
//!
//! All of it (runtime settings plus the in-memory episodes of the active
//! cassette) sits behind one mutex. Callers take the lock for short critical
//! sections only: the per-request decision, a control-plane update, and the
//! append-and-persist after a recording. It is never held across upstream I/O.

use crate::cassette::{CassetteError, CassetteStore, Episode};
use crate::config::{RuntimeSettings, TargetUrl};
use parking_lot::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Settings and episodes guarded by the state lock.
#[derive(Debug)]
pub struct ProxyState {
    pub settings: RuntimeSettings,
    pub episodes: Vec<Episode>,
}

/// Identifies the cassette a forwarded request will be recorded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTicket {
    pub cassette: String,
}

/// Where a finished recording ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Appended to the active cassette; holds its new episode count.
    Active(usize),
    /// The cassette was switched meanwhile; appended to its file only.
    Detached(usize),
}

pub struct SharedState {
    target: TargetUrl,
    store: CassetteStore,
    inner: Mutex<ProxyState>,
}

impl SharedState {
    /// Create the shared state, loading the initial cassette if one is set.
    pub fn new(target: TargetUrl, store: CassetteStore, initial: RuntimeSettings) -> Self {
        let episodes = if initial.is_pass_through() {
            Vec::new()
        } else {
            store.load_or_empty(&initial.cassette)
        };
        Self {
            target,
            store,
            inner: Mutex::new(ProxyState {
                settings: initial,
                episodes,
            }),
        }
    }

    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    pub fn store(&self) -> &CassetteStore {
        &self.store
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.inner.lock()
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.inner.lock().settings.clone()
    }

    pub fn episode_count(&self) -> usize {
        self.inner.lock().episodes.len()
    }

    /// Apply `update` to the settings. A changed cassette reloads `episodes` wholesale.
    ///
    /// Returns the settings after the update.
    pub fn update<F>(&self, update: F) -> RuntimeSettings
    where
        F: FnOnce(&mut RuntimeSettings),
    {
        let mut state = self.inner.lock();
        let previous = state.settings.cassette.clone();
        update(&mut state.settings);

        if state.settings.cassette != previous {
            state.episodes = if state.settings.is_pass_through() {
                Vec::new()
            } else {
                self.store.load_or_empty(&state.settings.cassette)
            };
            info!(
                "Switched cassette '{}' -> '{}' ({} episodes)",
                previous,
                state.settings.cassette,
                state.episodes.len()
            );
        }
        state.settings.clone()
    }

    /// Append a recorded episode and persist the cassette.
    ///
    /// When the ticket's cassette is still active the episode joins the
    /// in-memory list and the full list is saved; a save failure leaves the
    /// in-memory episode in place. When another cassette has been selected
    /// since the request was admitted, the episode is appended to its own
    /// cassette file and the active list is left alone.
    pub fn record(
        &self,
        ticket: &RecordTicket,
        episode: Episode,
    ) -> Result<RecordOutcome, CassetteError> {
        let mut state = self.inner.lock();
        if state.settings.cassette == ticket.cassette {
            state.episodes.push(episode);
            let count = state.episodes.len();
            self.store.save(&ticket.cassette, &state.episodes)?;
            return Ok(RecordOutcome::Active(count));
        }

        warn!(
            "Cassette '{}' is no longer active; appending recorded episode to its file",
            ticket.cassette
        );
        let count = self.store.append(&ticket.cassette, episode)?;
        Ok(RecordOutcome::Detached(count))
    }
}
