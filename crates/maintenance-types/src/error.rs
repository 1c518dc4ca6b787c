/// The taxonomy of failures the maintenance engine produces, independent of
/// any particular action. Every crate boundary in the workspace returns
/// `Result<T, MaintenanceError>`; `anyhow` takes over only at the binary edge.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("addAction called while similar action already processing")]
    DuplicateAction,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("shutting down")]
    ShuttingDown,

    #[error("transient I/O error: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("wrong checksum for shard {shard}")]
    WrongChecksum { shard: String },

    #[error("synchronize shard attempt timeout exceeded")]
    AttemptTimeoutExceeded,

    #[error("action {id} already complete")]
    AlreadyComplete { id: u64 },

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),

    /// An error carrying an explicit numeric code, for callers (and the
    /// scriptable `Test` action) that need `error_num()` to equal a specific
    /// value rather than whatever the matching variant happens to map to.
    #[error("error {code}: {message}")]
    Coded { code: i32, message: String },
}

impl MaintenanceError {
    /// A stable small integer, analogous to the original's `errorNumber()`,
    /// surfaced verbatim in the admin REST error body.
    pub fn error_num(&self) -> i32 {
        match self {
            MaintenanceError::BadParameter(_) => 400,
            MaintenanceError::DuplicateAction => 409,
            MaintenanceError::NotFound(_) => 404,
            MaintenanceError::ShuttingDown => 503,
            MaintenanceError::Transient(_) => 502,
            MaintenanceError::WrongChecksum { .. } => 1460,
            MaintenanceError::AttemptTimeoutExceeded => 1461,
            MaintenanceError::AlreadyComplete { .. } => 400,
            MaintenanceError::Internal(_) => 500,
            MaintenanceError::Coded { code, .. } => *code,
        }
    }

    /// Whether a `SynchronizeShard` attempt ending in this error should
    /// count towards the per-shard replication failure counter that feeds
    /// the Stage-1 backoff and auto-repair heuristics.
    pub fn counts_as_replication_failure(&self) -> bool {
        !matches!(self, MaintenanceError::AttemptTimeoutExceeded)
    }
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;
