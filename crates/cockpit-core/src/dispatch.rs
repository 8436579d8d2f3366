//! Run driver: post the turn input, poll the run, service one requires-action round and
//! extract this run's reply.
//!
//! Only one tool round is serviced per turn. If the run asks for tools a second time the
//! driver cancels it and extracts whatever the run has produced so far. A run still active
//! at the poll deadline is cancelled too, so the thread accepts the next turn's message.

use crate::error::ProviderError;
use crate::provider::{AssistantProvider, Run, RunOptions, RunStatus, ThreadMessage, ToolOutput};
use crate::tools::{ToolContext, ToolInvocation, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Emitted when neither this run nor the thread has any assistant text.
pub const NO_REPLY: &str = "no reply";

const MESSAGE_SCAN_LIMIT: usize = 20;

/// Where the reply text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    /// Assistant messages tagged with this turn's run id.
    Run,
    /// Most recent assistant message in the thread, any run.
    LatestInThread,
    Sentinel,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub text: String,
    pub source: ReplySource,
    pub tool_calls: Vec<ToolInvocation>,
}

pub struct RunDriver {
    provider: Arc<dyn AssistantProvider>,
    tools: ToolRegistry,
    poll_interval: Duration,
    deadline: Duration,
}

impl RunDriver {
    pub fn new(
        provider: Arc<dyn AssistantProvider>,
        tools: ToolRegistry,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            provider,
            tools,
            poll_interval,
            deadline,
        }
    }

    pub async fn drive(
        &self,
        thread: &str,
        assistant_id: &str,
        input: &str,
        options: &RunOptions,
        tool_ctx: &ToolContext,
    ) -> Result<RunOutcome, ProviderError> {
        self.provider.add_message(thread, input).await?;
        let run = self.provider.create_run(thread, assistant_id, options).await?;
        tracing::debug!(target: "cockpit::turn", thread, run_id = %run.id, "Run started");

        let started = Instant::now();
        let mut run = self.poll(thread, run, started).await?;
        let mut tool_calls = Vec::new();

        if run.status == RunStatus::RequiresAction {
            tool_calls = self.tools.execute_batch(tool_ctx, &run.required_action).await;
            let outputs: Vec<ToolOutput> = tool_calls
                .iter()
                .map(|inv| ToolOutput {
                    tool_call_id: inv.id.clone(),
                    output: inv.output_payload(),
                })
                .collect();
            tracing::info!(
                target: "cockpit::tools",
                project_id = %tool_ctx.project_id,
                run_id = %run.id,
                calls = outputs.len(),
                failed = tool_calls.iter().filter(|c| c.is_error()).count(),
                "Submitting tool outputs"
            );
            let resumed = self.provider.submit_tool_outputs(thread, &run.id, &outputs).await?;
            run = self.poll(thread, resumed, started).await?;

            if run.status == RunStatus::RequiresAction {
                tracing::warn!(
                    target: "cockpit::turn",
                    run_id = %run.id,
                    pending = run.required_action.len(),
                    "Run requested a second tool round; not serviced"
                );
                self.cancel(thread, &run.id).await;
            }
        }

        if run.status.is_failure() {
            return Err(ProviderError::RunFailed {
                run_id: run.id,
                status: run.status.as_str().to_string(),
                detail: run.last_error.unwrap_or_default(),
            });
        }

        let messages = self.provider.list_messages(thread, MESSAGE_SCAN_LIMIT).await?;
        let (text, source) = extract_reply(&messages, &run.id);
        Ok(RunOutcome {
            run_id: run.id,
            status: run.status,
            text,
            source,
            tool_calls,
        })
    }

    /// Poll until the run leaves the running states or the deadline passes.
    async fn poll(&self, thread: &str, mut run: Run, started: Instant) -> Result<Run, ProviderError> {
        while run.status.is_running() {
            if started.elapsed() >= self.deadline {
                self.cancel(thread, &run.id).await;
                return Err(ProviderError::Deadline {
                    run_id: run.id,
                    secs: self.deadline.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            run = self.provider.retrieve_run(thread, &run.id).await?;
        }
        Ok(run)
    }

    /// Best-effort; a failed cancel is logged and the run left to expire provider-side.
    async fn cancel(&self, thread: &str, run_id: &str) {
        match self.provider.cancel_run(thread, run_id).await {
            Ok(run) => tracing::info!(
                target: "cockpit::turn",
                run_id,
                status = run.status.as_str(),
                "Abandoned run cancelled"
            ),
            Err(e) => tracing::warn!(
                target: "cockpit::turn",
                run_id,
                error = %e,
                "Failed to cancel abandoned run"
            ),
        }
    }
}

/// Pick the reply for `run_id` out of newest-first `messages`.
pub fn extract_reply(messages: &[ThreadMessage], run_id: &str) -> (String, ReplySource) {
    let parts: Vec<&str> = messages
        .iter()
        .rev()
        .filter(|m| m.role == "assistant" && m.run_id.as_deref() == Some(run_id))
        .map(|m| m.text.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let joined = parts.join("\n\n").trim().to_string();
    if !joined.is_empty() {
        return (joined, ReplySource::Run);
    }

    let latest = messages
        .iter()
        .filter(|m| m.role == "assistant")
        .map(|m| m.text.trim())
        .find(|t| !t.is_empty());
    match latest {
        Some(text) => (text.to_string(), ReplySource::LatestInThread),
        None => (NO_REPLY.to_string(), ReplySource::Sentinel),
    }
}
