//! Records shared by the store, the turn pipeline and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role stored on reply rows written by the turn pipeline.
pub const ROLE_ASSISTANT: &str = "assistant";

/// Content type stored on reply rows.
pub const CONTENT_TYPE_MARKDOWN: &str = "text/markdown";

/// Per-project setting controlling how proposed changes are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyPolicy {
    /// Proposals are refused.
    #[default]
    Off,
    /// Proposals are recorded but never applied.
    Shadow,
    /// Proposals wait for the owner's confirmation.
    Ask,
    /// Proposals are applied immediately.
    Auto,
}

impl AutonomyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Shadow => "shadow",
            Self::Ask => "ask",
            Self::Auto => "auto",
        }
    }

    /// Lenient parse; anything unrecognised is `Off`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "shadow" => Self::Shadow,
            "ask" => Self::Ask,
            "auto" => Self::Auto,
            _ => Self::Off,
        }
    }
}

/// A project as the turn pipeline sees it. `agent_id` and `owner_id` are optional here
/// because the dashboard can create half-configured projects; the orchestrator rejects
/// a turn when either is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Provider-side assistant this project's turns run against.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub autonomy: AutonomyPolicy,
    /// Cached provider thread handle of the active conversation.
    #[serde(default)]
    pub thread_handle: Option<String>,
    /// Explicit "onboarding complete" flag; overrides individual step state.
    #[serde(default)]
    pub onboarding_complete: bool,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            agent_id: None,
            name: name.into(),
            autonomy: AutonomyPolicy::Off,
            thread_handle: None,
            onboarding_complete: false,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_autonomy(mut self, autonomy: AutonomyPolicy) -> Self {
        self.autonomy = autonomy;
        self
    }
}

/// Conversation thread bookkeeping. One active record per project; records are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: String,
    pub project_id: String,
    /// Provider thread handle.
    pub handle: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub expired: bool,
}

impl ConversationThread {
    /// Stale when explicitly expired or idle for longer than `idle`.
    pub fn is_stale(&self, now: DateTime<Utc>, idle: chrono::Duration) -> bool {
        self.expired || now.signed_duration_since(self.last_active_at) > idle
    }
}

/// Persisted assistant reply. At most one row per identical text per (project, thread)
/// inside the dedup window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub id: String,
    pub project_id: String,
    pub thread_id: String,
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub content_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Per-turn length hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Short,
    #[default]
    Normal,
    Long,
}

impl Verbosity {
    /// Absent or unrecognised values fall back to `Normal`.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("short") => Self::Short,
            Some("long") => Self::Long,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Normal => "normal",
            Self::Long => "long",
        }
    }

    /// Instruction line sent to the model.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Short => "Answer in at most two short sentences unless code or math is required.",
            Self::Normal => "Answer with a normal level of detail.",
            Self::Long => "Answer thoroughly, with structure and examples where useful.",
        }
    }
}

/// One entry of the recent-input log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEntry {
    pub id: String,
    pub project_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Where the entry came from (chat, quick note, telegram, ...).
    #[serde(default)]
    pub source: String,
}

/// Uploaded file metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Owner profile fields the prompt context uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerProfile {
    #[serde(default)]
    pub preferred_name: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
}

/// Domain state for one project: onboarding-backing fields plus what the panels show.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    #[serde(default)]
    pub vision: Option<String>,
    #[serde(default)]
    pub long_term_goals: Vec<String>,
    #[serde(default)]
    pub short_term_goals: Vec<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub open_tasks: Vec<String>,
    #[serde(default)]
    pub upcoming_events: Vec<String>,
}

impl DomainSnapshot {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
