//! Cockpit core: one conversation turn against a hosted assistant.
//!
//! Thread lifecycle, onboarding progress, best-effort context assembly, the tool-calling
//! run driver and exactly-once reply persistence. Collaborators (store, provider, change
//! endpoint, evaluator) are traits so the orchestrator runs without network access in tests.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod onboarding;
pub mod orchestrator;
pub mod persistence;
pub mod provider;
pub mod store;
pub mod thread;
pub mod tools;
pub mod verbosity;

pub use config::{CoreConfig, Secrets};
pub use context::{ContextAssembler, ContextBundle, FileSection, SharedContextSource, StoreSharedContext};
pub use dispatch::{RunDriver, NO_REPLY};
pub use error::{ProviderError, StoreError, ToolError, TurnError};
pub use models::{AutonomyPolicy, ConversationThread, Project, ReplyRecord, Verbosity};
pub use onboarding::{OnboardingProgress, OnboardingStep};
pub use orchestrator::{OnboardingReport, TurnDeps, TurnOrchestrator, TurnRequest, TurnResponse, APOLOGY};
pub use persistence::{ExactText, ReplyGuard, ReplyMatcher};
pub use provider::{AssistantProvider, OpenAiAssistants};
pub use store::{ProjectStore, ReplyLog, SledStore};
pub use thread::ThreadManager;
pub use tools::{Calculator, ChangeProposer, HttpChangeProposer, ToolRegistry};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
