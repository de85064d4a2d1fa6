//! Per-identity attendance debouncing.
//!
//! A person standing in front of the camera is re-matched on every frame.
//! The debouncer lets the first confident match through and suppresses the
//! rest until `wait_window` has elapsed since the last emitted event. The key
//! is the identity, not the face position, so leaving and re-entering the
//! frame inside the window is still suppressed.

use crate::types::IdentityId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Last emitted event time per identity, for one detection session.
///
/// Entries are never removed; a stale entry simply lets the next match through.
#[derive(Debug, Default, Clone)]
pub struct DebounceState {
    last_event: HashMap<IdentityId, DateTime<Utc>>,
}

impl DebounceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `id` should produce an event at `now`.
    ///
    /// Returns true and records `now` when there is no previous event or the
    /// previous one is more than `wait_window` old. Otherwise returns false
    /// and leaves the state untouched. With a zero window every later frame
    /// emits, but a second match at the same `now` is still suppressed.
    pub fn should_emit(&mut self, id: IdentityId, now: DateTime<Utc>, wait_window: Duration) -> bool {
        let emit = match self.last_event.get(&id) {
            None => true,
            Some(last) => window_elapsed(*last, now, wait_window),
        };
        if emit {
            self.last_event.insert(id, now);
        }
        emit
    }

    pub fn last_event(&self, id: IdentityId) -> Option<DateTime<Utc>> {
        self.last_event.get(&id).copied()
    }

    /// Number of identities seen this session.
    pub fn len(&self) -> usize {
        self.last_event.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_event.is_empty()
    }
}

/// True when strictly more than `wait_window` separates `last` and `now`.
/// Windows too large for a signed delta never elapse.
fn window_elapsed(last: DateTime<Utc>, now: DateTime<Utc>, wait_window: Duration) -> bool {
    match chrono::Duration::from_std(wait_window) {
        Ok(window) => now.signed_duration_since(last) > window,
        Err(_) => false,
    }
}
