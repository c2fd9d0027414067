//! Job lifecycle types and the per-image status state machine.

use crate::spec::{OutputFormat, TransformationSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status carried by jobs and mirrored on the image record.
///
/// Within one job attempt the sequence is a subsequence of
/// `pending -> processing -> {completed | failed}`; `pending` is never
/// revisited once left. Across attempts, queue redelivery re-enters
/// `processing` from `failed`, and a freshly admitted job (gate acquired)
/// may start a new cycle from either terminal state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Whether `next` is a legal successor of `self` on an image record.
    pub fn can_transition(self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        if self == next {
            // Idempotent rewrite, e.g. enqueueing onto a never-processed record.
            return true;
        }
        match (self, next) {
            (Pending, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            // Queue redelivery of a failed message retries the same job.
            (Failed, Processing) => true,
            // A new cycle after a finished one: enqueue or synchronous start.
            (Completed, Pending) | (Failed, Pending) => true,
            (Completed, Processing) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Location and shape of a produced derivative.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    /// Storage-relative path; always a fresh name, never the source.
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub format: OutputFormat,
}

/// A transformation request bound to an image, created at request time and
/// immutable apart from its status/error/result fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub image_id: String,
    pub owner_id: String,
    pub source_path: String,
    pub original_filename: String,
    pub spec: TransformationSpec,
    pub created_at: DateTime<Utc>,
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OutputDescriptor>,
}

impl Job {
    pub fn new(
        image_id: impl Into<String>,
        owner_id: impl Into<String>,
        source_path: impl Into<String>,
        original_filename: impl Into<String>,
        spec: TransformationSpec,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            image_id: image_id.into(),
            owner_id: owner_id.into(),
            source_path: source_path.into(),
            original_filename: original_filename.into(),
            spec,
            created_at: Utc::now(),
            status: ProcessingStatus::Pending,
            error: None,
            result: None,
        }
    }
}
