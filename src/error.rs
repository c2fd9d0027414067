use thiserror::Error;

/// Error taxonomy for the transformation core.
///
/// Synchronous callers receive these directly; the asynchronous path records
/// the rendered message on the image record instead, where it is visible
/// through status polling.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The spec failed validation before reaching the queue or the executor.
    #[error("invalid transformation spec: {0}")]
    Validation(String),

    /// Source file or image record missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A transformation is already in flight for this image. Never retried.
    #[error("a transformation is already in progress for image {0}")]
    AlreadyProcessing(String),

    /// The source bytes could not be decoded by any decoder in the chain.
    #[error("source image unreadable: {0}")]
    SourceUnreadable(String),

    /// Geometry or codec failure during pipeline execution.
    #[error("processing failed: {0}")]
    Processing(String),

    /// The queue could not be opened or a publish did not commit.
    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Unexpected plumbing failure (store I/O, encoding of records, joins).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TransformError {
    /// Message recorded on the image record when a job attempt fails.
    pub fn job_error_text(&self) -> String {
        self.to_string()
    }
}
