//! Enrollment: average several captured samples into one signature.

use crate::store::{CommitError, SignatureStore, StoreError};
use crate::types::{FeatureVector, IdentityId, VectorError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid enrollment input: {0}")]
    InvalidInput(String),
    #[error("no usable face in any captured sample")]
    NoUsableSamples,
    #[error("identity {0} is already enrolled")]
    AlreadyEnrolled(IdentityId),
    #[error("identity {0} not found")]
    NotFound(IdentityId),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl From<CommitError> for EnrollError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::AlreadyEnrolled(id) => EnrollError::AlreadyEnrolled(id),
            CommitError::NotFound(id) => EnrollError::NotFound(id),
            CommitError::Store(e) => EnrollError::Store(e),
        }
    }
}

/// Element-wise mean of `vectors`.
///
/// All vectors must share the dimension of the first one and contain only
/// finite values. Accumulates in f64 so that N copies of a vector average
/// back to exactly that vector.
pub fn aggregate(vectors: &[FeatureVector]) -> Result<FeatureVector, EnrollError> {
    let first = vectors
        .first()
        .ok_or_else(|| EnrollError::InvalidInput("no vectors to aggregate".into()))?;
    let dim = first.dimension();

    let mut sums = vec![0.0f64; dim];
    for (n, vector) in vectors.iter().enumerate() {
        vector
            .validate(dim)
            .map_err(|e: VectorError| EnrollError::InvalidInput(format!("sample {n}: {e}")))?;
        for (sum, v) in sums.iter_mut().zip(vector.as_slice()) {
            *sum += f64::from(*v);
        }
    }

    let count = vectors.len() as f64;
    Ok(FeatureVector::new(
        sums.into_iter().map(|s| (s / count) as f32).collect(),
    ))
}

/// Enroll `id` from the samples captured for it.
///
/// `None` samples are captures where extraction found no usable face; they
/// are skipped. Nothing is written unless every step succeeds.
pub fn enroll<S, I>(
    store: &mut S,
    id: IdentityId,
    samples: I,
    dimension: usize,
) -> Result<FeatureVector, EnrollError>
where
    S: SignatureStore + ?Sized,
    I: IntoIterator<Item = Option<FeatureVector>>,
{
    let mut skipped = 0usize;
    let usable: Vec<FeatureVector> = samples
        .into_iter()
        .filter_map(|s| {
            if s.is_none() {
                skipped += 1;
            }
            s
        })
        .collect();

    tracing::debug!(id, usable = usable.len(), skipped, "enroll: samples collected");

    if usable.is_empty() {
        return Err(EnrollError::NoUsableSamples);
    }
    for (n, sample) in usable.iter().enumerate() {
        sample
            .validate(dimension)
            .map_err(|e| EnrollError::InvalidInput(format!("sample {n}: {e}")))?;
    }

    let signature = aggregate(&usable)?;
    store.commit_signature(id, &signature)?;

    tracing::info!(id, samples = usable.len(), "signature enrolled");
    Ok(signature)
}
