//! Hosted assistant provider: threads, messages and runs.
//!
//! The turn pipeline only talks to [`AssistantProvider`]; the HTTP implementation lives in
//! [`openai`]. Tests substitute an in-process fake.

pub mod openai;

pub use openai::OpenAiAssistants;

use crate::error::ProviderError;
use crate::tools::ToolRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Cancelling,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
}

impl RunStatus {
    /// Still moving on the provider side; keep polling.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    /// Terminal and unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Cancelling => "cancelling",
            Self::RequiresAction => "requires_action",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
        }
    }
}

/// Snapshot of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Pending tool invocations when `status == RequiresAction`.
    pub required_action: Vec<ToolRequest>,
    pub last_error: Option<String>,
}

/// One message in a provider thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub text: String,
}

/// Output submitted for one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the assistant's configured model.
    pub model: Option<String>,
    /// Extra instructions appended to the assistant's own for this run.
    pub additional_instructions: Option<String>,
    /// Function definitions that replace the assistant's own tool list for this run.
    pub tools: Option<serde_json::Value>,
}

#[async_trait]
pub trait AssistantProvider: Send + Sync {
    /// Create an empty thread and return its handle.
    async fn create_thread(&self) -> Result<String, ProviderError>;

    async fn add_message(&self, thread: &str, content: &str) -> Result<(), ProviderError>;

    async fn create_run(
        &self,
        thread: &str,
        assistant_id: &str,
        options: &RunOptions,
    ) -> Result<Run, ProviderError>;

    async fn retrieve_run(&self, thread: &str, run_id: &str) -> Result<Run, ProviderError>;

    /// Submit the whole batch in one call.
    async fn submit_tool_outputs(
        &self,
        thread: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ProviderError>;

    /// Ask the provider to stop a run that is still active.
    async fn cancel_run(&self, thread: &str, run_id: &str) -> Result<Run, ProviderError>;

    /// Latest `limit` messages, newest first.
    async fn list_messages(
        &self,
        thread: &str,
        limit: usize,
    ) -> Result<Vec<ThreadMessage>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_and_failure_sets_are_disjoint() {
        for s in [
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::Cancelling,
            RunStatus::RequiresAction,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Expired,
            RunStatus::Incomplete,
        ] {
            assert!(!(s.is_running() && s.is_failure()), "{:?}", s);
        }
        assert!(!RunStatus::RequiresAction.is_running());
        assert!(!RunStatus::Completed.is_failure());
    }

    #[test]
    fn status_uses_wire_names() {
        let s: RunStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert_eq!(s, RunStatus::RequiresAction);
        assert_eq!(s.as_str(), "requires_action");
    }
}
