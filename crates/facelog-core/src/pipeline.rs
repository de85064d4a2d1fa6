//! Per-frame driver: match every probe, debounce confident matches.

use crate::debounce::DebounceState;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::types::{AttendanceEvent, FeatureVector, MatchResult, Roster, Tier, VectorError};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::time::Duration;

/// A probe that could not be classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedProbe {
    /// Position of the probe in the frame's input.
    pub index: usize,
    #[serde(serialize_with = "serialize_display")]
    pub error: VectorError,
}

/// Everything one frame produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameOutcome {
    /// One result per probe, in input order.
    pub results: Vec<MatchResult>,
    pub events: Vec<AttendanceEvent>,
    pub rejected: Vec<RejectedProbe>,
}

/// Process one frame with the default Euclidean matcher.
pub fn process_frame(
    probes: &[FeatureVector],
    roster: &Roster,
    state: &mut DebounceState,
    now: DateTime<Utc>,
    wait_window: Duration,
) -> FrameOutcome {
    process_frame_with(&EuclideanMatcher, probes, roster, state, now, wait_window)
}

/// Process one frame.
///
/// Probes are classified in parallel against the immutable roster. Debounce
/// decisions are then taken one probe at a time, in input order, by the
/// caller holding `state`, so two matches of the same person in one frame
/// can never both pass. A malformed probe is reported as `Unknown` and does
/// not affect the others.
pub fn process_frame_with<M: Matcher>(
    matcher: &M,
    probes: &[FeatureVector],
    roster: &Roster,
    state: &mut DebounceState,
    now: DateTime<Utc>,
    wait_window: Duration,
) -> FrameOutcome {
    let classified: Vec<Result<MatchResult, VectorError>> = probes
        .par_iter()
        .map(|probe| -> Result<MatchResult, VectorError> {
            probe.validate(roster.dimension())?;
            Ok(matcher.classify(probe, roster))
        })
        .collect();

    let mut outcome = FrameOutcome {
        results: Vec::with_capacity(probes.len()),
        ..Default::default()
    };

    for (index, classified) in classified.into_iter().enumerate() {
        let result = match classified {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(index, %error, "malformed probe");
                outcome.rejected.push(RejectedProbe { index, error });
                MatchResult::unknown()
            }
        };

        if result.tier == Tier::Confident {
            if let Some(identity) = &result.identity {
                if state.should_emit(identity.id, now, wait_window) {
                    tracing::info!(
                        id = identity.id,
                        name = %identity.display_name,
                        distance = result.distance,
                        "attendance event"
                    );
                    outcome.events.push(AttendanceEvent {
                        identity_id: identity.id,
                        timestamp: now,
                    });
                } else {
                    tracing::trace!(id = identity.id, "suppressed duplicate");
                }
            }
        }

        outcome.results.push(result);
    }

    tracing::debug!(
        probes = probes.len(),
        events = outcome.events.len(),
        rejected = outcome.rejected.len(),
        "frame processed"
    );
    outcome
}

fn serialize_display<S: serde::Serializer>(err: &VectorError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}
