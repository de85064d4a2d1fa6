use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Dimension of the face encodings produced by the usual extraction model.
pub const DEFAULT_DIMENSION: usize = 128;

/// Display text for a face that did not resolve to an enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Primary key of an enrolled person (employee / user id).
pub type IdentityId = i64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("feature vector is empty")]
    Empty,
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("non-finite value at index {index}")]
    NonFinite { index: usize },
}

/// Facial feature vector produced by the extraction model.
///
/// Treated as an opaque embedding: the only meaningful operation is
/// distance. Values cannot be modified once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Check that the vector is usable at dimension `expected`.
    pub fn validate(&self, expected: usize) -> Result<(), VectorError> {
        if self.values.is_empty() {
            return Err(VectorError::Empty);
        }
        if self.values.len() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                got: self.values.len(),
            });
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(VectorError::NonFinite { index }),
            None => Ok(()),
        }
    }

    /// Euclidean distance. Lower = more similar.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// An enrolled person with their committed signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub display_name: String,
    pub signature: FeatureVector,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RosterError {
    #[error("identity {0} appears more than once")]
    DuplicateIdentity(IdentityId),
    #[error("identity {id} has an unusable signature: {source}")]
    InvalidSignature {
        id: IdentityId,
        #[source]
        source: VectorError,
    },
}

/// Immutable snapshot of every enrolled identity, in store order.
///
/// Order matters: on an exact distance tie the first identity wins.
#[derive(Debug, Clone)]
pub struct Roster {
    dimension: usize,
    identities: Vec<Identity>,
}

impl Roster {
    pub fn new(dimension: usize, identities: Vec<Identity>) -> Result<Self, RosterError> {
        let mut seen = HashSet::with_capacity(identities.len());
        for identity in &identities {
            if !seen.insert(identity.id) {
                return Err(RosterError::DuplicateIdentity(identity.id));
            }
            identity
                .signature
                .validate(dimension)
                .map_err(|source| RosterError::InvalidSignature {
                    id: identity.id,
                    source,
                })?;
        }
        Ok(Self {
            dimension,
            identities,
        })
    }

    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            identities: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Confidence tier of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Below the confident threshold; eligible for an attendance event.
    Confident,
    /// Between the two thresholds; shown, never recorded.
    Tentative,
    Unknown,
}

impl Tier {
    /// Lowercase name, the same string used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Confident => "confident",
            Tier::Tentative => "tentative",
            Tier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity a probe resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedIdentity {
    pub id: IdentityId,
    pub display_name: String,
}

/// Result of matching one probe vector against a roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity: Option<MatchedIdentity>,
    /// Distance to the nearest signature; infinite when there was nothing to compare.
    pub distance: f32,
    pub tier: Tier,
}

impl MatchResult {
    /// Result for a probe that could not be compared to anything.
    pub fn unknown() -> Self {
        Self {
            identity: None,
            distance: f32::INFINITY,
            tier: Tier::Unknown,
        }
    }

    /// Text to draw next to the face.
    pub fn label(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.display_name.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }
}

/// A recorded attendance mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub identity_id: IdentityId,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
