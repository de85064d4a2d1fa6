//! SQLite-backed identity store and attendance log.

use facelog_core::{
    AttendanceEvent, CommitError, EventSink, FeatureVector, Identity, IdentityDirectory,
    IdentityId, IdentitySummary, Roster, SignatureStore, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id           INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    signature    BLOB
);
CREATE TABLE IF NOT EXISTS attendance_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id),
    logged_at   TEXT NOT NULL,
    check_type  TEXT NOT NULL
);
";

pub struct SqliteStore {
    conn: Connection,
    dimension: usize,
    check_type: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, dimension: usize, check_type: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::with_connection(conn, dimension, check_type)
    }

    #[cfg(test)]
    pub fn open_in_memory(dimension: usize, check_type: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?, dimension, check_type)
    }

    fn with_connection(conn: Connection, dimension: usize, check_type: &str) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn,
            dimension,
            check_type: check_type.to_string(),
        })
    }
}

impl SignatureStore for SqliteStore {
    fn load_roster(&self) -> Result<Roster, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_name, signature FROM identities WHERE signature IS NOT NULL ORDER BY id")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, IdentityId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(backend)?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, display_name, blob) = row.map_err(backend)?;
            let signature = decode_signature(id, &blob, self.dimension)?;
            identities.push(Identity {
                id,
                display_name,
                signature,
            });
        }

        tracing::debug!(identities = identities.len(), "roster loaded from database");
        Ok(Roster::new(self.dimension, identities)?)
    }

    fn commit_signature(&mut self, id: IdentityId, signature: &FeatureVector) -> Result<(), CommitError> {
        let existing: Option<bool> = self
            .conn
            .query_row(
                "SELECT signature IS NOT NULL FROM identities WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;

        match existing {
            None => return Err(CommitError::NotFound(id)),
            Some(true) => {
                tracing::info!(id, "signature already exists; not overwritten");
                return Err(CommitError::AlreadyEnrolled(id));
            }
            Some(false) => {}
        }

        // The IS NULL guard keeps a concurrent writer from being overwritten.
        let updated = self
            .conn
            .execute(
                "UPDATE identities SET signature = ?1 WHERE id = ?2 AND signature IS NULL",
                params![encode_signature(signature), id],
            )
            .map_err(backend)?;
        if updated == 0 {
            return Err(CommitError::AlreadyEnrolled(id));
        }
        Ok(())
    }
}

impl EventSink for SqliteStore {
    fn record(&mut self, event: &AttendanceEvent) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO attendance_logs (identity_id, logged_at, check_type) VALUES (?1, ?2, ?3)",
                params![event.identity_id, event.timestamp.to_rfc3339(), self.check_type],
            )
            .map_err(|e| StoreError::SinkFailure(e.to_string()))?;
        Ok(())
    }
}

impl IdentityDirectory for SqliteStore {
    fn register_identity(&mut self, id: IdentityId, display_name: &str) -> Result<bool, StoreError> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO identities (id, display_name) VALUES (?1, ?2)",
                params![id, display_name],
            )
            .map_err(backend)?;
        Ok(inserted == 1)
    }

    fn clear_signature(&mut self, id: IdentityId) -> Result<bool, StoreError> {
        let updated = self
            .conn
            .execute("UPDATE identities SET signature = NULL WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(updated == 1)
    }

    fn list_identities(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_name, signature IS NOT NULL FROM identities ORDER BY id")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IdentitySummary {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    enrolled: row.get(2)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Little-endian f32 bytes.
fn encode_signature(signature: &FeatureVector) -> Vec<u8> {
    signature
        .as_slice()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_signature(id: IdentityId, blob: &[u8], dimension: usize) -> Result<FeatureVector, StoreError> {
    if blob.len() != dimension * 4 {
        return Err(StoreError::CorruptSignature {
            id,
            reason: format!("expected {} bytes, got {}", dimension * 4, blob.len()),
        });
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(FeatureVector::new(values))
}
