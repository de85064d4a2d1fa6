use crate::engine::{EngineError, EngineHandle, EnrollOutcome};
use facelog_core::{EnrollError, FeatureVector, IdentityId};
use zbus::interface;

/// D-Bus interface for the Facelog attendance daemon.
///
/// Bus name: org.facelog.Attendance1
/// Object path: /org/facelog/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    check_type: String,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, check_type: String) -> Self {
        Self { engine, check_type }
    }
}

#[interface(name = "org.facelog.Attendance1")]
impl AttendanceService {
    /// Register a person so they can be enrolled. False if the id is taken.
    async fn register(&self, id: i64, name: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, name, "register requested");
        self.engine
            .register(id, name.to_string())
            .await
            .map_err(to_fdo)
    }

    /// Enroll from a JSON array of samples; `null` marks a capture with no usable face.
    async fn enroll(&self, id: i64, samples_json: &str) -> zbus::fdo::Result<String> {
        let samples: Vec<Option<FeatureVector>> = serde_json::from_str(samples_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("samples: {e}")))?;
        tracing::info!(id, samples = samples.len(), "enroll requested");

        let outcome = self.engine.enroll(id, samples).await.map_err(to_fdo)?;
        Ok(match outcome {
            EnrollOutcome::Enrolled => "enrolled".into(),
            EnrollOutcome::AlreadyEnrolled => "already_enrolled".into(),
        })
    }

    /// Remove a committed signature so the person can be enrolled again.
    async fn clear_signature(&self, id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "clear_signature requested");
        self.engine.clear_signature(id).await.map_err(to_fdo)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.list_identities().await.map_err(to_fdo)?;
        serde_json::to_string(&identities).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Start a detection session. Returns the roster size.
    async fn start_session(&self) -> zbus::fdo::Result<u32> {
        let size = self.engine.start_session().await.map_err(to_fdo)?;
        Ok(size as u32)
    }

    async fn stop_session(&self) -> zbus::fdo::Result<bool> {
        self.engine.stop_session().await.map_err(to_fdo)
    }

    /// Reload the roster into the running session. Returns the new roster size.
    async fn reload_roster(&self) -> zbus::fdo::Result<u32> {
        let size = self.engine.reload_roster().await.map_err(to_fdo)?;
        Ok(size as u32)
    }

    /// Match one frame's probe vectors (JSON array of arrays) and record attendance.
    async fn process_frame(&self, probes_json: &str) -> zbus::fdo::Result<String> {
        let probes: Vec<FeatureVector> = serde_json::from_str(probes_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("probes: {e}")))?;
        let report = self
            .engine
            .process_frame(probes, chrono::Utc::now())
            .await
            .map_err(to_fdo)?;
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "check_type": self.check_type,
            "engine": status,
        })
        .to_string())
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::NotFound(id) => not_found(id),
        EngineError::Enroll(EnrollError::InvalidInput(msg)) => zbus::fdo::Error::InvalidArgs(msg),
        EngineError::NoSession | EngineError::SessionActive => {
            zbus::fdo::Error::Failed(err.to_string())
        }
        EngineError::ChannelClosed | EngineError::Spawn(_) => {
            zbus::fdo::Error::ServiceUnknown(err.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn not_found(id: IdentityId) -> zbus::fdo::Error {
    zbus::fdo::Error::InvalidArgs(format!("identity {id} not found"))
}
