//! Two-tier nearest-signature matching.

use crate::types::{FeatureVector, MatchResult, MatchedIdentity, Roster, Tier};

/// Distances at or above this are not the same person.
pub const CANDIDATE_THRESHOLD: f32 = 0.45;
/// Distances below this are trusted enough to record attendance.
pub const CONFIDENT_THRESHOLD: f32 = 0.30;

/// Strategy for resolving a probe vector against a roster snapshot.
///
/// Implementations must be pure: the same probe and roster always give the
/// same result, so probes of one frame can be classified concurrently.
pub trait Matcher: Sync {
    fn classify(&self, probe: &FeatureVector, roster: &Roster) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher with fixed thresholds.
pub struct EuclideanMatcher;

impl EuclideanMatcher {
    /// Map a nearest-signature distance onto a tier.
    pub fn tier_for(distance: f32) -> Tier {
        if distance >= CANDIDATE_THRESHOLD {
            Tier::Unknown
        } else if distance < CONFIDENT_THRESHOLD {
            Tier::Confident
        } else {
            Tier::Tentative
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn classify(&self, probe: &FeatureVector, roster: &Roster) -> MatchResult {
        // A vector of the wrong shape is not comparable to any signature.
        if probe.validate(roster.dimension()).is_err() {
            return MatchResult::unknown();
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        // Strict `<` keeps the first of equally distant identities.
        for (i, identity) in roster.identities().iter().enumerate() {
            let dist = probe.euclidean_distance(&identity.signature);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let Some(idx) = best_idx else {
            return MatchResult::unknown();
        };

        let tier = Self::tier_for(best_dist);
        let identity = match tier {
            Tier::Unknown => None,
            Tier::Confident | Tier::Tentative => {
                let best = &roster.identities()[idx];
                Some(MatchedIdentity {
                    id: best.id,
                    display_name: best.display_name.clone(),
                })
            }
        };

        MatchResult {
            identity,
            distance: best_dist,
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, IdentityId};

    fn identity(id: IdentityId, name: &str, values: Vec<f32>) -> Identity {
        Identity {
            id,
            display_name: name.into(),
            signature: FeatureVector::new(values),
        }
    }

    /// Probe at exactly `distance` from the origin along the first axis.
    fn probe_at(distance: f32) -> FeatureVector {
        FeatureVector::new(vec![distance, 0.0, 0.0])
    }

    fn single_roster() -> Roster {
        Roster::new(3, vec![identity(1, "Alice", vec![0.0, 0.0, 0.0])]).unwrap()
    }

    #[test]
    fn test_confident_match() {
        let result = EuclideanMatcher.classify(&probe_at(0.2), &single_roster());
        assert_eq!(result.tier, Tier::Confident);
        assert_eq!(result.identity.as_ref().map(|i| i.id), Some(1));
        assert_eq!(result.label(), "Alice");
        assert!((result.distance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_tentative_match_keeps_identity() {
        let result = EuclideanMatcher.classify(&probe_at(0.35), &single_roster());
        assert_eq!(result.tier, Tier::Tentative);
        assert_eq!(result.identity.as_ref().map(|i| i.id), Some(1));
    }

    #[test]
    fn test_beyond_candidate_is_unknown() {
        let result = EuclideanMatcher.classify(&probe_at(0.5), &single_roster());
        assert_eq!(result.tier, Tier::Unknown);
        assert!(result.identity.is_none());
        assert_eq!(result.label(), "Unknown");
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(EuclideanMatcher::tier_for(CONFIDENT_THRESHOLD), Tier::Tentative);
        assert_eq!(EuclideanMatcher::tier_for(CANDIDATE_THRESHOLD), Tier::Unknown);
        assert_eq!(EuclideanMatcher::tier_for(0.0), Tier::Confident);
        assert_eq!(EuclideanMatcher::tier_for(f32::INFINITY), Tier::Unknown);
    }

    #[test]
    fn test_empty_roster() {
        let result = EuclideanMatcher.classify(&probe_at(0.0), &Roster::empty(3));
        assert_eq!(result.tier, Tier::Unknown);
        assert!(result.identity.is_none());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_wrong_dimension_is_unknown() {
        let roster = single_roster();
        let short = FeatureVector::new(vec![0.0]);
        let result = EuclideanMatcher.classify(&short, &roster);
        assert_eq!(result.tier, Tier::Unknown);
        assert!(result.identity.is_none());
        assert!(result.distance.is_infinite());

        let long = FeatureVector::new(vec![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(EuclideanMatcher.classify(&long, &roster).tier, Tier::Unknown);
    }

    #[test]
    fn test_non_finite_vector_is_unknown() {
        let nan = FeatureVector::new(vec![f32::NAN, 0.0, 0.0]);
        let result = EuclideanMatcher.classify(&nan, &single_roster());
        assert_eq!(result.tier, Tier::Unknown);
        assert!(result.identity.is_none());
    }

    #[test]
    fn test_nearest_wins_regardless_of_position() {
        let roster = Roster::new(
            3,
            vec![
                identity(1, "far", vec![0.0, 1.0, 0.0]),
                identity(2, "mid", vec![0.0, 0.0, 0.4]),
                identity(3, "near", vec![0.1, 0.0, 0.0]),
            ],
        )
        .unwrap();
        let result = EuclideanMatcher.classify(&probe_at(0.0), &roster);
        assert_eq!(result.identity.as_ref().map(|i| i.id), Some(3));
        assert_eq!(result.tier, Tier::Confident);
    }

    #[test]
    fn test_tie_resolves_to_first_in_roster_order() {
        let roster = Roster::new(
            3,
            vec![
                identity(20, "first", vec![0.0, 0.1, 0.0]),
                identity(10, "second", vec![0.0, 0.0, 0.1]),
            ],
        )
        .unwrap();
        for _ in 0..5 {
            let result = EuclideanMatcher.classify(&probe_at(0.0), &roster);
            assert_eq!(result.identity.as_ref().map(|i| i.id), Some(20));
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let roster = single_roster();
        let probe = probe_at(0.31);
        let first = EuclideanMatcher.classify(&probe, &roster);
        let second = EuclideanMatcher.classify(&probe, &roster);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tier_invariants_hold_over_sweep() {
        let roster = single_roster();
        for step in 0..100 {
            let d = step as f32 * 0.01;
            let result = EuclideanMatcher.classify(&probe_at(d), &roster);
            match result.tier {
                Tier::Confident => assert!(result.distance < CONFIDENT_THRESHOLD),
                Tier::Tentative => assert!(
                    result.distance >= CONFIDENT_THRESHOLD && result.distance < CANDIDATE_THRESHOLD
                ),
                Tier::Unknown => assert!(result.distance >= CANDIDATE_THRESHOLD),
            }
        }
    }
}
