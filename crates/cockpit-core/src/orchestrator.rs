//! One conversation turn, end to end.
//!
//! Order of work: validate the project, derive onboarding progress and assemble context
//! (concurrently), resolve the thread, run the assistant (or answer an onboarding question
//! locally), shape the reply, append the onboarding nudge, persist.

use crate::config::CoreConfig;
use crate::context::{ContextAssembler, SharedContextSource, StoreSharedContext};
use crate::dispatch::{RunDriver, NO_REPLY};
use crate::error::TurnError;
use crate::models::{ConversationThread, Project, ReplyRecord, Verbosity};
use crate::onboarding::{self, OnboardingProgress, OnboardingState};
use crate::persistence::{ExactText, PersistOrigin, ReplyGuard, ReplyMatcher};
use crate::provider::{AssistantProvider, RunOptions};
use crate::store::{ProjectStore, ReplyLog};
use crate::thread::ThreadManager;
use crate::tools::{Calculator, ChangeProposer, NumericEvaluator, ToolContext, ToolRegistry};
use crate::verbosity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The only user-facing failure text.
pub const APOLOGY: &str =
    "Sorry, something went wrong while talking to your assistant. Please try again.";

/// Inbound turn. Field names match the dashboard's JSON and form posts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "projectId", default)]
    pub project_id: String,
    #[serde(rename = "modelId", default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
}

impl TurnRequest {
    pub fn new(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_verbosity(mut self, verbosity: &str) -> Self {
        self.verbosity = Some(verbosity.to_string());
        self
    }

    pub fn with_model(mut self, model_id: &str) -> Self {
        self.model_id = Some(model_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub reply: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub appended: Option<ReplyRecord>,
    pub onboarding: bool,
    pub step: String,
    pub onboarding_status: u8,
}

/// Onboarding view served by the status route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingReport {
    pub active: bool,
    pub step: String,
    #[serde(rename = "statusCount")]
    pub status_count: u8,
    pub completed_flag: bool,
}

/// Collaborators a [`TurnOrchestrator`] is built from.
pub struct TurnDeps {
    pub store: Arc<dyn ProjectStore>,
    pub replies: Arc<dyn ReplyLog>,
    pub provider: Arc<dyn AssistantProvider>,
    pub proposer: Arc<dyn ChangeProposer>,
    pub evaluator: Arc<dyn NumericEvaluator>,
    pub shared_context: Arc<dyn SharedContextSource>,
    pub matcher: Arc<dyn ReplyMatcher>,
}

impl TurnDeps {
    /// Defaults: built-in calculator, store-backed shared context, exact-text dedup.
    pub fn new(
        store: Arc<dyn ProjectStore>,
        replies: Arc<dyn ReplyLog>,
        provider: Arc<dyn AssistantProvider>,
        proposer: Arc<dyn ChangeProposer>,
    ) -> Self {
        Self {
            shared_context: Arc::new(StoreSharedContext::new(store.clone())),
            store,
            replies,
            provider,
            proposer,
            evaluator: Arc::new(Calculator),
            matcher: Arc::new(ExactText),
        }
    }

    pub fn with_shared_context(mut self, source: Arc<dyn SharedContextSource>) -> Self {
        self.shared_context = source;
        self
    }
}

pub struct TurnOrchestrator {
    store: Arc<dyn ProjectStore>,
    context: ContextAssembler,
    threads: ThreadManager,
    driver: RunDriver,
    guard: ReplyGuard,
    onboarding_nudges: bool,
    short_word_limit: usize,
    default_model: Option<String>,
}

impl TurnOrchestrator {
    pub fn new(deps: TurnDeps, config: &CoreConfig) -> Self {
        let tools = ToolRegistry::new(deps.evaluator, deps.proposer);
        Self {
            context: ContextAssembler::new(
                deps.store.clone(),
                deps.shared_context,
                config.persona_label.clone(),
                config.recent_inputs_limit,
                config.file_listing_limit,
            ),
            threads: ThreadManager::new(
                deps.store.clone(),
                deps.provider.clone(),
                config.thread_idle(),
            ),
            driver: RunDriver::new(
                deps.provider,
                tools,
                config.poll_interval(),
                config.run_deadline(),
            ),
            guard: ReplyGuard::new(
                deps.replies,
                deps.matcher,
                config.dedup_window(),
                config.dedup_scan_limit,
            ),
            store: deps.store,
            onboarding_nudges: config.onboarding_nudges,
            short_word_limit: config.short_word_limit,
            default_model: config
                .default_model
                .clone()
                .filter(|m| !m.trim().is_empty()),
        }
    }

    pub async fn handle(&self, req: &TurnRequest) -> Result<TurnResponse, TurnError> {
        self.handle_at(req, Utc::now()).await
    }

    /// Run a turn as of `now`.
    pub async fn handle_at(
        &self,
        req: &TurnRequest,
        now: DateTime<Utc>,
    ) -> Result<TurnResponse, TurnError> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err(TurnError::InvalidRequest("message is empty".into()));
        }
        let project = self.load_project(&req.project_id).await?;
        let (agent_id, owner_id) = bound_identities(&project)?;
        let verbosity = Verbosity::parse_or_default(req.verbosity.as_deref());

        tracing::info!(
            target: "cockpit::turn",
            project_id = %project.id,
            verbosity = verbosity.as_str(),
            "Turn started"
        );

        let (progress, bundle) = tokio::join!(
            self.progress(&project),
            self.context.assemble(&project, message, verbosity, now),
        );
        if bundle.is_degraded() {
            tracing::info!(
                target: "cockpit::turn",
                project_id = %project.id,
                degraded = bundle.degraded.len(),
                "Continuing with degraded context"
            );
        }

        let thread = self.threads.resolve(&project.id, now).await?;

        let direct = onboarding::is_onboarding_question(message);
        let (core, run_id, tool_calls) = if direct {
            (progress.describe(), None, Vec::new())
        } else {
            let input = format!("{}\n\n---\n{}", bundle.render(), message);
            let options = RunOptions {
                model: req
                    .model_id
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .or_else(|| self.default_model.clone()),
                additional_instructions: None,
                tools: Some(ToolRegistry::definitions()),
            };
            let tool_ctx = ToolContext {
                project_id: project.id.clone(),
                owner_id: owner_id.to_string(),
                autonomy: project.autonomy,
            };
            let outcome = self
                .driver
                .drive(thread.handle(), agent_id, &input, &options, &tool_ctx)
                .await?;
            (outcome.text, Some(outcome.run_id), outcome.tool_calls)
        };

        // Shape the core reply first; the nudge is appended unshortened.
        let mut reply = verbosity::shape(&core, verbosity, self.short_word_limit);
        let nudge = if self.onboarding_nudges && !direct && reply != NO_REPLY {
            progress.nudge()
        } else {
            None
        };
        if let Some(nudge) = nudge {
            reply = format!("{}\n\n{}", reply, nudge);
        }

        let metadata = serde_json::json!({
            "run_id": run_id,
            "verbosity": verbosity.as_str(),
            "tool_calls": tool_calls
                .iter()
                .map(|c| serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "ok": !c.is_error(),
                }))
                .collect::<Vec<_>>(),
            "onboarding_nudge": nudge.is_some(),
        });
        let persisted = self
            .guard
            .persist(&project.id, thread.handle(), &reply, metadata, now)
            .await;

        tracing::info!(
            target: "cockpit::turn",
            project_id = %project.id,
            thread = %thread.handle(),
            direct,
            tool_calls = tool_calls.len(),
            persisted = ?persisted.origin,
            "Turn finished"
        );
        if persisted.origin == PersistOrigin::Fallback {
            tracing::warn!(target: "cockpit::turn", project_id = %project.id, "Reply not durably stored");
        }

        Ok(TurnResponse {
            reply,
            thread_id: thread.record.handle,
            appended: persisted.record,
            onboarding: progress.active,
            step: progress.step_key().to_string(),
            onboarding_status: progress.status_count,
        })
    }

    pub async fn onboarding(&self, project_id: &str) -> Result<OnboardingReport, TurnError> {
        let project = self.load_project(project_id).await?;
        let progress = self.progress(&project).await;
        Ok(OnboardingReport {
            active: progress.active,
            step: progress.step_key().to_string(),
            status_count: progress.status_count,
            completed_flag: project.onboarding_complete,
        })
    }

    pub async fn current_thread(
        &self,
        project_id: &str,
    ) -> Result<Option<ConversationThread>, TurnError> {
        self.load_project(project_id).await?;
        Ok(self.store.latest_thread(project_id).await?)
    }

    async fn load_project(&self, project_id: &str) -> Result<Project, TurnError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(TurnError::InvalidRequest("projectId is required".into()));
        }
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| TurnError::Configuration(format!("unknown project {}", project_id)))
    }

    /// Onboarding progress; an unreadable snapshot counts as empty.
    async fn progress(&self, project: &Project) -> OnboardingProgress {
        let snapshot = match self.store.domain_snapshot(&project.id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    target: "cockpit::turn",
                    project_id = %project.id,
                    error = %e,
                    "Domain snapshot unavailable for onboarding"
                );
                Default::default()
            }
        };
        onboarding::sequence(&OnboardingState::from_snapshot(
            &snapshot,
            project.onboarding_complete,
        ))
    }
}

fn bound_identities(project: &Project) -> Result<(&str, &str), TurnError> {
    let agent = project
        .agent_id
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            TurnError::Configuration(format!("project {} has no bound agent", project.id))
        })?;
    let owner = project
        .owner_id
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .ok_or_else(|| TurnError::Configuration(format!("project {} has no owner", project.id)))?;
    Ok((agent, owner))
}
