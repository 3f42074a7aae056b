use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Failure kinds surfaced by the reconciliation engine.
///
/// `NotFound` and `Validation` abort a whole request. `ProvisioningFailed`
/// and `PersistenceConflict` are collected per item inside batches and are
/// only fatal for the single-item update path.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("failed to provision work \"{name}\": {reason}")]
    ProvisioningFailed { name: String, reason: String },

    #[error("progress write failed for child {child_id}, work {work_id}: {reason}")]
    PersistenceConflict {
        child_id: String,
        work_id: String,
        reason: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl ReconcileError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable wire code used in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ProvisioningFailed { .. } => "provisioning_failed",
            Self::PersistenceConflict { .. } => "persistence_conflict",
            Self::Validation(_) => "bad_params",
            Self::Database(_) => "db_query_failed",
        }
    }
}
