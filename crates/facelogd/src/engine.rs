use chrono::{DateTime, Utc};
use facelog_core::{
    enroll, EnrollError, EventSink, FeatureVector, FrameReport, IdentityDirectory, IdentityId,
    IdentitySummary, Session, SignatureStore, StoreError,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("enrollment failed: {0}")]
    Enroll(EnrollError),
    #[error("identity {0} not found")]
    NotFound(IdentityId),
    #[error("no detection session is running")]
    NoSession,
    #[error("a detection session is already running")]
    SessionActive,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Everything the engine needs from its storage backend.
pub trait Backend: SignatureStore + EventSink + IdentityDirectory + Send + 'static {}

impl<T: SignatureStore + EventSink + IdentityDirectory + Send + 'static> Backend for T {}

/// Result of an enrollment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollOutcome {
    Enrolled,
    /// A signature was already committed; nothing was written.
    AlreadyEnrolled,
}

/// Snapshot of engine state for the status call.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session_active: bool,
    pub roster_size: usize,
    pub frames_processed: u64,
    pub tracked_identities: usize,
    pub dimension: usize,
    pub wait_secs: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        id: IdentityId,
        display_name: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Enroll {
        id: IdentityId,
        samples: Vec<Option<FeatureVector>>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    ClearSignature {
        id: IdentityId,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    ListIdentities {
        reply: oneshot::Sender<Result<Vec<IdentitySummary>, EngineError>>,
    },
    StartSession {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    StopSession {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    ReloadRoster {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    ProcessFrame {
        probes: Vec<FeatureVector>,
        now: DateTime<Utc>,
        reply: oneshot::Sender<Result<FrameReport, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Add a person who can later be enrolled.
    pub async fn register(&self, id: IdentityId, display_name: String) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::Register {
            id,
            display_name,
            reply,
        })
        .await
    }

    /// Average the usable samples and commit them as the person's signature.
    pub async fn enroll(
        &self,
        id: IdentityId,
        samples: Vec<Option<FeatureVector>>,
    ) -> Result<EnrollOutcome, EngineError> {
        self.request(|reply| EngineRequest::Enroll { id, samples, reply })
            .await
    }

    pub async fn clear_signature(&self, id: IdentityId) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::ClearSignature { id, reply })
            .await
    }

    pub async fn list_identities(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.request(|reply| EngineRequest::ListIdentities { reply })
            .await
    }

    /// Load a roster snapshot and start debouncing from scratch.
    pub async fn start_session(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::StartSession { reply })
            .await
    }

    /// End the session after any frame already queued ahead of this call.
    pub async fn stop_session(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::StopSession { reply })
            .await
    }

    /// Swap in a freshly loaded roster, keeping debounce history.
    pub async fn reload_roster(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::ReloadRoster { reply })
            .await
    }

    pub async fn process_frame(
        &self,
        probes: Vec<FeatureVector>,
        now: DateTime<Utc>,
    ) -> Result<FrameReport, EngineError> {
        self.request(|reply| EngineRequest::ProcessFrame { probes, now, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// State owned by the engine thread. Every debounce decision happens here,
/// one request at a time.
struct Engine<B> {
    store: B,
    dimension: usize,
    wait_window: Duration,
    session: Option<Session>,
}

impl<B: Backend> Engine<B> {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Register {
                id,
                display_name,
                reply,
            } => {
                let result = self
                    .store
                    .register_identity(id, &display_name)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::Enroll { id, samples, reply } => {
                let _ = reply.send(self.enroll(id, samples));
            }
            EngineRequest::ClearSignature { id, reply } => {
                let result = self.store.clear_signature(id).map_err(EngineError::from);
                if let Ok(true) = result {
                    tracing::info!(id, "signature cleared");
                }
                let _ = reply.send(result);
            }
            EngineRequest::ListIdentities { reply } => {
                let _ = reply.send(self.store.list_identities().map_err(EngineError::from));
            }
            EngineRequest::StartSession { reply } => {
                let _ = reply.send(self.start_session());
            }
            EngineRequest::StopSession { reply } => {
                let stopped = self.session.take().is_some();
                if stopped {
                    tracing::info!("detection session stopped");
                }
                let _ = reply.send(Ok(stopped));
            }
            EngineRequest::ReloadRoster { reply } => {
                let _ = reply.send(self.reload_roster());
            }
            EngineRequest::ProcessFrame { probes, now, reply } => {
                let result = match self.session.as_mut() {
                    Some(session) => Ok(session.process(&probes, now, &mut self.store)),
                    None => Err(EngineError::NoSession),
                };
                let _ = reply.send(result);
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
        }
    }

    fn enroll(
        &mut self,
        id: IdentityId,
        samples: Vec<Option<FeatureVector>>,
    ) -> Result<EnrollOutcome, EngineError> {
        match enroll(&mut self.store, id, samples, self.dimension) {
            Ok(_) => Ok(EnrollOutcome::Enrolled),
            Err(EnrollError::AlreadyEnrolled(id)) => {
                tracing::info!(id, "enrollment skipped: signature already exists");
                Ok(EnrollOutcome::AlreadyEnrolled)
            }
            Err(EnrollError::NotFound(id)) => Err(EngineError::NotFound(id)),
            Err(e) => {
                tracing::warn!(id, error = %e, "enrollment failed");
                Err(EngineError::Enroll(e))
            }
        }
    }

    fn start_session(&mut self) -> Result<usize, EngineError> {
        if self.session.is_some() {
            return Err(EngineError::SessionActive);
        }
        let session = Session::start(&self.store, self.wait_window).map_err(|e| {
            tracing::error!(error = %e, "roster load failed; session not started");
            EngineError::Store(e)
        })?;
        let size = session.roster().len();
        self.session = Some(session);
        Ok(size)
    }

    /// A failed reload ends the session: matching without a roster is meaningless.
    fn reload_roster(&mut self) -> Result<usize, EngineError> {
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::NoSession);
        };
        match self.store.load_roster() {
            Ok(roster) => {
                let size = roster.len();
                session.swap_roster(Arc::new(roster));
                Ok(size)
            }
            Err(e) => {
                tracing::error!(error = %e, "roster reload failed; stopping session");
                self.session = None;
                Err(EngineError::Store(e))
            }
        }
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            session_active: self.session.is_some(),
            roster_size: self.session.as_ref().map_or(0, |s| s.roster().len()),
            frames_processed: self.session.as_ref().map_or(0, |s| s.frames_processed()),
            tracked_identities: self.session.as_ref().map_or(0, |s| s.debounce().len()),
            dimension: self.dimension,
            wait_secs: self.wait_window.as_secs(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread that owns `store`.
///
/// The thread serves requests in arrival order until every handle is dropped.
pub fn spawn_engine<B: Backend>(
    store: B,
    dimension: usize,
    wait_window: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    let mut engine = Engine {
        store,
        dimension,
        wait_window,
        session: None,
    };

    std::thread::Builder::new()
        .name("facelog-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use facelog_core::{MemoryStore, Tier};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn v(values: &[f32]) -> FeatureVector {
        FeatureVector::new(values.to_vec())
    }

    async fn engine_with_alice() -> EngineHandle {
        let handle = spawn_engine(MemoryStore::new(2), 2, Duration::from_secs(60)).unwrap();
        assert!(handle.register(1, "Alice".into()).await.unwrap());
        let outcome = handle
            .enroll(1, vec![Some(v(&[0.0, 0.0])), None, Some(v(&[0.0, 0.0]))])
            .await
            .unwrap();
        assert_eq!(outcome, EnrollOutcome::Enrolled);
        handle
    }

    #[tokio::test]
    async fn test_frame_requires_session() {
        let handle = engine_with_alice().await;
        let err = handle.process_frame(vec![v(&[0.0, 0.0])], t(0)).await.unwrap_err();
        assert!(matches!(err, EngineError::NoSession));
    }

    #[tokio::test]
    async fn test_attendance_debounced_across_frames() {
        let handle = engine_with_alice().await;
        assert_eq!(handle.start_session().await.unwrap(), 1);

        let probe = v(&[0.2, 0.0]);
        let first = handle.process_frame(vec![probe.clone()], t(0)).await.unwrap();
        assert_eq!(first.outcome.results[0].tier, Tier::Confident);
        assert_eq!(first.outcome.events.len(), 1);

        let second = handle.process_frame(vec![probe.clone()], t(1)).await.unwrap();
        assert!(second.outcome.events.is_empty());

        let third = handle.process_frame(vec![probe], t(61)).await.unwrap();
        assert_eq!(third.outcome.events.len(), 1);

        let status = handle.status().await.unwrap();
        assert!(status.session_active);
        assert_eq!(status.frames_processed, 3);
        assert_eq!(status.tracked_identities, 1);
    }

    #[tokio::test]
    async fn test_restarting_session_resets_debounce() {
        let handle = engine_with_alice().await;
        handle.start_session().await.unwrap();
        assert!(matches!(
            handle.start_session().await.unwrap_err(),
            EngineError::SessionActive
        ));

        let probe = v(&[0.1, 0.0]);
        handle.process_frame(vec![probe.clone()], t(0)).await.unwrap();
        assert!(handle.stop_session().await.unwrap());
        assert!(!handle.stop_session().await.unwrap());

        handle.start_session().await.unwrap();
        let report = handle.process_frame(vec![probe], t(1)).await.unwrap();
        assert_eq!(report.outcome.events.len(), 1);
    }

    #[tokio::test]
    async fn test_reenroll_is_informational() {
        let handle = engine_with_alice().await;
        let outcome = handle.enroll(1, vec![Some(v(&[0.5, 0.5]))]).await.unwrap();
        assert_eq!(outcome, EnrollOutcome::AlreadyEnrolled);

        assert!(handle.clear_signature(1).await.unwrap());
        let outcome = handle.enroll(1, vec![Some(v(&[0.5, 0.5]))]).await.unwrap();
        assert_eq!(outcome, EnrollOutcome::Enrolled);
    }

    #[tokio::test]
    async fn test_enroll_failures() {
        let handle = engine_with_alice().await;
        assert!(handle.register(2, "Bob".into()).await.unwrap());

        let err = handle.enroll(2, vec![None, None]).await.unwrap_err();
        assert!(matches!(err, EngineError::Enroll(EnrollError::NoUsableSamples)));

        let err = handle.enroll(3, vec![Some(v(&[0.0, 0.0]))]).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(3)));

        let listing = handle.list_identities().await.unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing[0].enrolled);
        assert!(!listing[1].enrolled);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_enrollment() {
        let handle = engine_with_alice().await;
        handle.start_session().await.unwrap();
        handle.register(2, "Bob".into()).await.unwrap();
        handle.enroll(2, vec![Some(v(&[3.0, 3.0]))]).await.unwrap();

        let bob = v(&[3.0, 3.1]);
        let before = handle.process_frame(vec![bob.clone()], t(0)).await.unwrap();
        assert_eq!(before.outcome.results[0].tier, Tier::Unknown);

        assert_eq!(handle.reload_roster().await.unwrap(), 2);
        let after = handle.process_frame(vec![bob], t(1)).await.unwrap();
        assert_eq!(after.outcome.results[0].label(), "Bob");
        assert_eq!(after.outcome.events.len(), 1);
    }
}
