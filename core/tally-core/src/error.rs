//! Error types for tally-core operations.
//!
//! `StoreError` is what a session store implementation reports. `TallyError`
//! is what the timer, tray and bridge surface to callers; it wraps store
//! failures with the operation that hit them.

use std::path::PathBuf;

use crate::timer::TimerPhase;

// ═══════════════════════════════════════════════════════════════════════════════
// Store Error (reported by SessionStore implementations)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Session already stopped: {session_id}")]
    Conflict { session_id: String },

    #[error("Project {project_id} already has a running session: {session_id}")]
    AlreadyRunning {
        project_id: String,
        session_id: String,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<String> for StoreError {
    fn from(message: String) -> Self {
        StoreError::Backend(message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Core Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in tally-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    // ─────────────────────────────────────────────────────────────────────
    // Timer Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid timer configuration: {0}")]
    Validation(String),

    #[error("Cannot {operation} while timer is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: TimerPhase,
    },

    #[error("Cannot {operation}: a session store call is still in flight")]
    Busy { operation: &'static str },

    // ─────────────────────────────────────────────────────────────────────
    // Session Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to create session: {0}")]
    SessionCreate(#[source] StoreError),

    #[error("Failed to stop session {session_id}: {source}")]
    SessionStop {
        session_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to delete session {session_id}: {source}")]
    SessionDelete {
        session_id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration and I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TallyError {
    /// Stable machine-readable code, used by the daemon protocol.
    pub fn code(&self) -> &'static str {
        match self {
            TallyError::Validation(_) => "validation_error",
            TallyError::InvalidTransition { .. } => "invalid_transition",
            TallyError::Busy { .. } => "busy",
            TallyError::SessionCreate(_) => "session_create_error",
            TallyError::SessionStop { .. } => "session_stop_error",
            TallyError::SessionDelete { .. } => "session_delete_error",
            TallyError::Store(StoreError::NotFound { .. }) => "not_found",
            TallyError::Store(StoreError::AlreadyRunning { .. }) => "already_running",
            TallyError::Store(_) => "store_error",
            TallyError::Config { .. } => "config_error",
            TallyError::Io { .. } => "io_error",
            TallyError::Json { .. } => "json_error",
        }
    }
}

/// Convenience type alias for Results using TallyError.
pub type Result<T> = std::result::Result<T, TallyError>;

impl From<TallyError> for String {
    fn from(err: TallyError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_stop_error_names_session_and_cause() {
        let err = TallyError::SessionStop {
            session_id: "s-1".to_string(),
            source: StoreError::Conflict {
                session_id: "s-1".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Failed to stop session s-1: Session already stopped: s-1"
        );
        assert_eq!(err.code(), "session_stop_error");
    }

    #[test]
    fn store_not_found_maps_to_not_found_code() {
        let err = TallyError::from(StoreError::NotFound {
            entity: "Project",
            id: "P9".to_string(),
        });
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.to_string(), "Project not found: P9");
    }
}
