//! In-memory tape with mode-driven playback and recording.

use super::format::TapeFile;
use super::match_rule::MatchRule;
use super::mode::TapeMode;
use super::types::{Interaction, RecordedRequest, RecordedResponse};
use crate::error::TapeError;
use parking_lot::RwLock;
use tracing::debug;

/// What the proxy should do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer with the recorded response, without contacting upstream
    Replay(Interaction),
    /// Forward upstream and record the exchange
    Forward,
    /// Refuse: read-only tape with no matching interaction
    Deny,
}

struct TapeState {
    mode: TapeMode,
    match_rule: MatchRule,
    interactions: Vec<Interaction>,
    /// Next eligible interaction in `READ_SEQUENTIAL` mode
    cursor: usize,
    dirty: bool,
    /// Set once the tape has been saved for the last time; no more records
    closed: bool,
}

/// A named, append-only list of interactions.
///
/// All mutable state sits behind one lock. Lookups in non-sequential modes
/// share the read lock; sequential playback and recording take the write lock.
pub struct Tape {
    name: String,
    state: RwLock<TapeState>,
}

impl Tape {
    pub fn new(name: impl Into<String>, mode: TapeMode, match_rule: MatchRule) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(TapeState {
                mode,
                match_rule,
                interactions: Vec::new(),
                cursor: 0,
                dirty: false,
                closed: false,
            }),
        }
    }

    /// Rebuild a clean tape from its persisted form.
    pub fn from_file(file: TapeFile) -> Self {
        Self {
            name: file.name,
            state: RwLock::new(TapeState {
                mode: file.mode,
                match_rule: file.match_rule,
                interactions: file.interactions,
                cursor: 0,
                dirty: false,
                closed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TapeMode {
        self.state.read().mode
    }

    /// Change the mode. The sequential cursor restarts from the beginning.
    pub fn set_mode(&self, mode: TapeMode) {
        let mut state = self.state.write();
        state.mode = mode;
        state.cursor = 0;
    }

    pub fn match_rule(&self) -> MatchRule {
        self.state.read().match_rule.clone()
    }

    pub fn set_match_rule(&self, rule: MatchRule) {
        self.state.write().match_rule = rule;
    }

    pub fn size(&self) -> usize {
        self.state.read().interactions.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Snapshot of the recorded interactions, in order.
    pub fn interactions(&self) -> Vec<Interaction> {
        self.state.read().interactions.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Find the recorded interaction that answers `request`, if any.
    pub fn try_play(&self, request: &RecordedRequest) -> Option<Interaction> {
        self.play(request).0
    }

    /// Decide how to serve `request`.
    pub fn decide(&self, request: &RecordedRequest) -> Decision {
        match self.play(request) {
            (Some(interaction), _) => Decision::Replay(interaction),
            (None, mode) if mode.is_writable() => Decision::Forward,
            (None, _) => Decision::Deny,
        }
    }

    /// Playback lookup, together with the mode it was made under.
    fn play(&self, request: &RecordedRequest) -> (Option<Interaction>, TapeMode) {
        {
            let state = self.state.read();
            match state.mode {
                TapeMode::ReadOnly | TapeMode::ReadWrite => {
                    let hit = state
                        .interactions
                        .iter()
                        .find(|i| state.match_rule.matches(request, &i.request))
                        .cloned();
                    return (hit, state.mode);
                }
                TapeMode::WriteOnly | TapeMode::WriteSequential => return (None, state.mode),
                TapeMode::ReadSequential => {}
            }
        }

        let mut state = self.state.write();
        // Mode may have changed between the two locks
        if state.mode != TapeMode::ReadSequential {
            drop(state);
            return self.play(request);
        }

        let cursor = state.cursor;
        let hit = state
            .interactions
            .get(cursor)
            .filter(|i| state.match_rule.matches(request, &i.request))
            .cloned();
        if hit.is_some() {
            state.cursor += 1;
        } else {
            debug!(
                tape = %self.name,
                cursor,
                "Sequential playback mismatch for {} {}",
                request.method,
                request.uri
            );
        }
        (hit, state.mode)
    }

    /// Append an exchange to the tape.
    pub fn record(
        &self,
        request: RecordedRequest,
        response: RecordedResponse,
    ) -> Result<(), TapeError> {
        let mut state = self.state.write();
        if state.closed {
            return Err(TapeError::TapeClosed(self.name.clone()));
        }
        if !state.mode.is_writable() {
            return Err(TapeError::RecordingNotPermitted {
                name: self.name.clone(),
                mode: state.mode.to_string(),
            });
        }
        state.interactions.push(Interaction::new(request, response));
        state.dirty = true;
        Ok(())
    }

    /// Persisted form of the current contents.
    pub fn to_file(&self) -> TapeFile {
        let state = self.state.read();
        self.file_from(&state)
    }

    /// Persist with `write` if dirty, holding the write lock throughout so no
    /// record lands between serialization and clearing the dirty flag.
    ///
    /// Returns `Ok(false)` when there was nothing to write.
    pub(crate) fn flush_with<F>(&self, write: F) -> Result<bool, TapeError>
    where
        F: FnOnce(&TapeFile) -> Result<(), TapeError>,
    {
        self.write_locked(write, false)
    }

    /// Like [`Tape::flush_with`], then refuse every later record. A failed
    /// write leaves the tape open and dirty.
    pub(crate) fn close_with<F>(&self, write: F) -> Result<bool, TapeError>
    where
        F: FnOnce(&TapeFile) -> Result<(), TapeError>,
    {
        self.write_locked(write, true)
    }

    fn write_locked<F>(&self, write: F, close: bool) -> Result<bool, TapeError>
    where
        F: FnOnce(&TapeFile) -> Result<(), TapeError>,
    {
        let mut state = self.state.write();
        let written = if state.dirty {
            write(&self.file_from(&state))?;
            state.dirty = false;
            true
        } else {
            false
        };
        if close {
            state.closed = true;
        }
        Ok(written)
    }

    fn file_from(&self, state: &TapeState) -> TapeFile {
        TapeFile {
            name: self.name.clone(),
            mode: state.mode,
            match_rule: state.match_rule.clone(),
            interactions: state.interactions.clone(),
        }
    }
}

impl std::fmt::Debug for Tape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Tape")
            .field("name", &self.name)
            .field("mode", &state.mode)
            .field("size", &state.interactions.len())
            .field("dirty", &state.dirty)
            .field("closed", &state.closed)
            .finish()
    }
}
