//! Detection session: one roster snapshot plus the debounce state built on it.

use crate::debounce::DebounceState;
use crate::pipeline::{process_frame, FrameOutcome};
use crate::store::{EventSink, SignatureStore, StoreError};
use crate::types::{FeatureVector, Roster};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Frame outcome plus what happened when the events were recorded.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    #[serde(flatten)]
    pub outcome: FrameOutcome,
    /// Events the sink refused. They stay debounced.
    pub sink_failures: usize,
}

/// A running detection session.
///
/// Owns its debounce state exclusively; dropping the session discards it.
pub struct Session {
    roster: Arc<Roster>,
    debounce: DebounceState,
    wait_window: Duration,
    frames: u64,
}

impl Session {
    /// Load the roster once and start with an empty debounce state.
    pub fn start<S: SignatureStore + ?Sized>(store: &S, wait_window: Duration) -> Result<Self, StoreError> {
        let roster = store.load_roster()?;
        tracing::info!(
            identities = roster.len(),
            dimension = roster.dimension(),
            wait_secs = wait_window.as_secs(),
            "detection session started"
        );
        Ok(Self::with_roster(Arc::new(roster), wait_window))
    }

    pub fn with_roster(roster: Arc<Roster>, wait_window: Duration) -> Self {
        Self {
            roster,
            debounce: DebounceState::new(),
            wait_window,
            frames: 0,
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn debounce(&self) -> &DebounceState {
        &self.debounce
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Install a new roster snapshot. Debounce history is kept.
    pub fn swap_roster(&mut self, roster: Arc<Roster>) {
        tracing::info!(
            previous = self.roster.len(),
            identities = roster.len(),
            "roster snapshot swapped"
        );
        self.roster = roster;
    }

    /// Run one frame and hand its events to `sink`.
    ///
    /// Recording happens after every debounce decision for the frame has
    /// been taken. A refused write is logged and counted; it does not undo
    /// the debounce entry and does not stop the frame.
    pub fn process<K: EventSink + ?Sized>(
        &mut self,
        probes: &[FeatureVector],
        now: DateTime<Utc>,
        sink: &mut K,
    ) -> FrameReport {
        let outcome = process_frame(probes, &self.roster, &mut self.debounce, now, self.wait_window);
        self.frames += 1;

        let mut sink_failures = 0;
        for event in &outcome.events {
            if let Err(err) = sink.record(event) {
                sink_failures += 1;
                tracing::warn!(
                    id = event.identity_id,
                    error = %err,
                    "failed to record attendance; event dropped"
                );
            }
        }

        FrameReport {
            outcome,
            sink_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IdentityDirectory, MemoryStore};
    use crate::types::Tier;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn store_with_alice() -> MemoryStore {
        let mut store = MemoryStore::new(2);
        store.register_identity(1, "Alice").unwrap();
        store
            .commit_signature(1, &FeatureVector::new(vec![0.0, 0.0]))
            .unwrap();
        store
    }

    #[test]
    fn test_events_reach_sink() {
        let mut store = store_with_alice();
        let mut session = Session::start(&store, Duration::from_secs(60)).unwrap();
        let probe = FeatureVector::new(vec![0.2, 0.0]);

        let report = session.process(&[probe.clone()], t(0), &mut store);
        assert_eq!(report.outcome.events.len(), 1);
        assert_eq!(report.sink_failures, 0);

        session.process(&[probe.clone()], t(1), &mut store);
        session.process(&[probe], t(61), &mut store);
        assert_eq!(store.events().len(), 2);
        assert_eq!(session.frames_processed(), 3);
    }

    #[test]
    fn test_sink_failure_keeps_debounce_entry() {
        let mut store = store_with_alice();
        let mut session = Session::start(&store, Duration::from_secs(60)).unwrap();
        let probe = FeatureVector::new(vec![0.1, 0.0]);

        store.set_fail_records(true);
        let report = session.process(&[probe.clone()], t(0), &mut store);
        assert_eq!(report.sink_failures, 1);
        assert_eq!(session.debounce().last_event(1), Some(t(0)));

        store.set_fail_records(false);
        let report = session.process(&[probe], t(5), &mut store);
        assert!(report.outcome.events.is_empty());
        assert!(store.events().is_empty());
    }

    #[test]
    fn test_roster_is_a_snapshot() {
        let mut store = MemoryStore::new(2);
        store.register_identity(1, "Alice").unwrap();
        let mut session = Session::start(&store, Duration::from_secs(60)).unwrap();

        store
            .commit_signature(1, &FeatureVector::new(vec![0.0, 0.0]))
            .unwrap();
        let probe = FeatureVector::new(vec![0.0, 0.0]);
        let report = session.process(&[probe.clone()], t(0), &mut store);
        assert_eq!(report.outcome.results[0].tier, Tier::Unknown);

        session.swap_roster(Arc::new(store.load_roster().unwrap()));
        let report = session.process(&[probe], t(1), &mut store);
        assert_eq!(report.outcome.results[0].tier, Tier::Confident);
        assert_eq!(report.outcome.events.len(), 1);
    }

    #[test]
    fn test_report_json_shape() {
        let mut store = store_with_alice();
        let mut session = Session::start(&store, Duration::from_secs(60)).unwrap();
        let report = session.process(&[FeatureVector::new(vec![0.1, 0.0])], t(0), &mut store);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["tier"], "confident");
        assert_eq!(json["results"][0]["identity"]["display_name"], "Alice");
        assert_eq!(json["events"][0]["identity_id"], 1);
        assert_eq!(json["sink_failures"], 0);
    }
}
