use rmcp::ErrorData as McpError;
use serde_json::Value;

/// Failures of a single remix attempt. Every variant aborts the attempt.
#[derive(Debug, thiserror::Error)]
pub enum RemixError {
    #[error("failed to load media: {0}")]
    MediaLoad(String),

    #[error("failed to capture frame at {timestamp:.3}s: {reason}")]
    FrameCapture { timestamp: f64, reason: String },

    #[error("generation request failed: {0}")]
    JobSubmission(String),

    #[error("generation job {handle} timed out after {polls} polls")]
    JobTimeout { handle: String, polls: u32 },

    #[error("generation job {handle} failed: {message}")]
    JobFailed { handle: String, message: String },

    #[error("no generated media in result payload (top-level keys: {keys:?})")]
    ResultNotFound { keys: Vec<String> },

    #[error("unsupported result format: {0}")]
    UnsupportedResultFormat(String),

    #[error("failed to upload derived media: {0}")]
    StorageUpload(String),

    /// The bytes were stored at `orphaned_ref` but the request record was not updated.
    #[error("derived media stored at {orphaned_ref} but linking request {request_id} failed: {reason}")]
    LinkWrite {
        request_id: String,
        orphaned_ref: String,
        reason: String,
    },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("record store error: {0}")]
    RecordStore(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RemixError>;

impl RemixError {
    /// Short user-facing category, one notification per failed attempt.
    pub fn user_message(&self) -> &'static str {
        match self {
            RemixError::MediaLoad(_) | RemixError::FrameCapture { .. } => "failed to process video",
            RemixError::JobSubmission(_) | RemixError::JobFailed { .. } => "generation failed",
            RemixError::JobTimeout { .. } => "generation timed out",
            RemixError::ResultNotFound { .. } | RemixError::UnsupportedResultFormat(_) => {
                "generation returned an unusable result"
            }
            RemixError::StorageUpload(_) => "failed to upload result",
            RemixError::LinkWrite { .. } => "failed to save result",
            RemixError::InvalidReference(_) => "this advertisement cannot be remixed",
            RemixError::RecordStore(_) => "failed to save prompt",
            RemixError::Config(_) => "service is not configured",
        }
    }
}

impl From<RemixError> for McpError {
    fn from(err: RemixError) -> Self {
        let data = Some(Value::String(err.to_string()));
        match &err {
            RemixError::InvalidReference(_) => McpError::invalid_params(err.user_message(), data),
            _ => McpError::internal_error(err.user_message(), data),
        }
    }
}
