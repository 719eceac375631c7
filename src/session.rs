// Generation lifecycle values: status, request and session snapshots

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Message stored when a producer fails without saying why.
pub const GENERIC_FAILURE_MESSAGE: &str = "Generation failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Idle,
    Generating,
    Success,
    Error,
    Cancelled,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GenerationStatus::Success | GenerationStatus::Error | GenerationStatus::Cancelled
        )
    }

    /// Whether a START event is accepted from this status.
    pub fn can_start(self) -> bool {
        self != GenerationStatus::Generating
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationStatus::Idle => "idle",
            GenerationStatus::Generating => "generating",
            GenerationStatus::Success => "success",
            GenerationStatus::Error => "error",
            GenerationStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What to continue from. Immutable once a generation starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub base_text: String,
    pub instruction: Option<String>,
}

impl GenerationRequest {
    pub fn new(base_text: impl Into<String>) -> Self {
        Self {
            base_text: base_text.into(),
            instruction: None,
        }
    }

    /// Attach an instruction; blank instructions are treated as absent.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.instruction = if instruction.trim().is_empty() {
            None
        } else {
            Some(instruction)
        };
        self
    }
}

/// One snapshot of the lifecycle. Transitions build a new value instead of
/// mutating the current one, so the controller can keep every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationSession {
    pub status: GenerationStatus,
    pub request: Option<GenerationRequest>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl GenerationSession {
    pub fn idle() -> Self {
        Self {
            status: GenerationStatus::Idle,
            request: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// A fresh generating session. Previous session data is not carried over.
    pub fn generating(request: GenerationRequest) -> Self {
        Self {
            status: GenerationStatus::Generating,
            request: Some(request),
            error_message: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> Self {
        self.finish(GenerationStatus::Success, None)
    }

    pub fn failed(&self, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            message
        };
        self.finish(GenerationStatus::Error, Some(message))
    }

    pub fn cancelled(&self) -> Self {
        self.finish(GenerationStatus::Cancelled, None)
    }

    fn finish(&self, status: GenerationStatus, error_message: Option<String>) -> Self {
        debug_assert_eq!(self.status, GenerationStatus::Generating);
        Self {
            status,
            request: self.request.clone(),
            error_message,
            started_at: self.started_at,
            finished_at: Some(Utc::now()),
        }
    }
}
