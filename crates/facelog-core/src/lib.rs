//! facelog-core — Attendance matching and deduplication engine.
//!
//! Enrolled facial signatures are matched against probe vectors with a
//! two-tier Euclidean threshold; confident matches pass through a
//! per-identity debouncer before an attendance event is emitted.

pub mod debounce;
pub mod enrollment;
pub mod matcher;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod types;

pub use debounce::DebounceState;
pub use enrollment::{aggregate, enroll, EnrollError};
pub use matcher::{EuclideanMatcher, Matcher, CANDIDATE_THRESHOLD, CONFIDENT_THRESHOLD};
pub use pipeline::{process_frame, process_frame_with, FrameOutcome, RejectedProbe};
pub use session::{FrameReport, Session};
pub use store::{
    CommitError, EventSink, IdentityDirectory, IdentitySummary, MemoryStore, SignatureStore,
    StoreError,
};
pub use types::{
    AttendanceEvent, FeatureVector, Identity, IdentityId, MatchResult, MatchedIdentity, Roster,
    RosterError, Tier, VectorError, DEFAULT_DIMENSION,
};
