use thiserror::Error;

/// Central error type for the ETL pipeline crate
#[derive(Error, Debug)]
pub enum EtlError {
    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Storage not configured: {0}")]
    NotConfigured(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Caller contract violation: {0}")]
    CallerContract(String),

    #[error("Record has no usable value for partition field '{field}'")]
    MissingPartitionField { field: String },

    // ============================================================================
    // Pipeline Context Errors
    // ============================================================================
    #[error("Artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("Artifact has unexpected type: {0}")]
    ArtifactType(String),

    #[error("Metadata key is reserved: {0}")]
    ReservedMetadata(String),

    // ============================================================================
    // Scheduler Errors
    // ============================================================================
    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Mutex lock error")]
    LockError,
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for EtlError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        EtlError::LockError
    }
}

// Helper type alias for Results
pub type EtlResult<T> = Result<T, EtlError>;
