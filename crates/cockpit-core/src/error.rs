//! Error types for the turn pipeline.
//!
//! Collaborator errors (`StoreError`, `ProviderError`, `ToolError`) stay close to the thing
//! that failed. `TurnError` is what a whole turn returns; the gateway renders every variant
//! the same way (fixed apology plus the `Display` string as a diagnostic).

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the project/domain store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Sled(#[from] sled::Error),

    #[error("Record encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt record under key {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the hosted assistant provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider response could not be decoded: {0}")]
    Decode(String),

    #[error("Run {run_id} ended with status {status}: {detail}")]
    RunFailed {
        run_id: String,
        status: String,
        detail: String,
    },

    #[error("Run {run_id} did not reach a terminal state within {secs}s")]
    Deadline { run_id: String, secs: u64 },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Per-invocation tool failures. These are fed back to the model as structured error
/// results and never abort a turn.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Autonomy policy '{0}' does not allow proposing changes")]
    PolicyDenied(String),

    #[error("Missing service credentials for {0}")]
    MissingCredentials(String),

    #[error("Change endpoint failed: {0}")]
    Endpoint(String),

    #[error("Unhandled tool: {0}")]
    Unhandled(String),
}

impl ToolError {
    /// Stable machine-readable code sent to the model alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Evaluation(_) => "evaluation_failed",
            Self::PolicyDenied(_) => "policy_denied",
            Self::MissingCredentials(_) => "missing_credentials",
            Self::Endpoint(_) => "endpoint_failed",
            Self::Unhandled(_) => "unhandled_tool",
        }
    }
}

/// Turn-level failure. Only these abort a turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// Missing agent binding or owner id, or an unknown project.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Top-level provider failure (thread creation, run start, run failure).
    #[error("Upstream provider error: {0}")]
    UpstreamProvider(#[from] ProviderError),

    /// A store operation the turn cannot proceed without: project lookup, the latest
    /// thread read, or recording a newly created thread. Reply persistence never lands
    /// here; the reply guard recovers those failures itself.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TurnError {
    /// True when the client sent something unusable, as opposed to a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}
