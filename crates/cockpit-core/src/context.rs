//! Prompt context assembly.
//!
//! Every source is read independently and may fail on its own. A failed source falls back
//! (shared context -> direct input-log read -> nothing) and is recorded in
//! [`ContextBundle::degraded`]; assembly itself never returns an error.

use crate::error::StoreError;
use crate::models::{DomainSnapshot, FileEntry, InputEntry, OwnerProfile, Project, Verbosity};
use crate::store::ProjectStore;
use crate::tools::{TOOL_CALCULATE, TOOL_PROPOSE_CHANGES};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::Arc;

/// Rendered when the message carried no file command.
pub const FILES_NOT_REQUESTED: &str = "File listing: not requested.";

/// Rendered when a file command matched nothing.
pub const NO_MATCHING_FILES: &str = "no matching files";

/// Source tag for inputs written by the turn pipeline.
pub const INPUT_SOURCE_CHAT: &str = "chat";

const TOOL_USE_INSTRUCTION: &str = "Use the calculate tool for any arithmetic instead of computing it yourself. \
Use propose_changes when the user asks to add, edit or remove goals, tasks or events; \
never claim a change was applied unless the tool result says so.";

static FILE_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*/files?\b(?:\s+(.*))?$").expect("file command pattern is valid")
});

/// What the combined shared-context source returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedContext {
    pub snapshot: DomainSnapshot,
    /// Newest first.
    pub recent_inputs: Vec<InputEntry>,
}

/// Combined read of domain snapshot and recent inputs.
#[async_trait]
pub trait SharedContextSource: Send + Sync {
    async fn shared_context(&self, project_id: &str, limit: usize)
        -> Result<SharedContext, StoreError>;
}

/// Reads both halves from the project store concurrently.
pub struct StoreSharedContext {
    store: Arc<dyn ProjectStore>,
}

impl StoreSharedContext {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SharedContextSource for StoreSharedContext {
    async fn shared_context(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<SharedContext, StoreError> {
        let (snapshot, recent_inputs) = tokio::try_join!(
            self.store.domain_snapshot(project_id),
            self.store.recent_inputs(project_id, limit),
        )?;
        Ok(SharedContext {
            snapshot,
            recent_inputs,
        })
    }
}

/// A parsed `/files [query]` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommand {
    pub query: Option<String>,
}

impl FileCommand {
    /// Recognise a leading `/files` (or `/file`) token with an optional trailing query.
    pub fn parse(message: &str) -> Option<Self> {
        let caps = FILE_COMMAND.captures(message)?;
        let query = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|q| !q.is_empty());
        Some(Self { query })
    }
}

/// The three states of the file section.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSection {
    NotRequested,
    Empty { query: Option<String> },
    Populated {
        query: Option<String>,
        /// Newest first.
        files: Vec<FileEntry>,
    },
}

impl FileSection {
    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::NotRequested)
    }
}

/// Context source that fell back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    SharedContext,
    InputLog,
    OwnerProfile,
    FileListing,
    InputLogWrite,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharedContext => "shared_context",
            Self::InputLog => "input_log",
            Self::OwnerProfile => "owner_profile",
            Self::FileListing => "file_listing",
            Self::InputLogWrite => "input_log_write",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Degradation {
    pub source: ContextSource,
    pub reason: String,
}

/// Per-turn prompt context. Rebuilt every turn, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBundle {
    pub now: DateTime<Utc>,
    pub persona: String,
    pub preferred_name: Option<String>,
    pub verbosity: Verbosity,
    pub snapshot: DomainSnapshot,
    pub recent_inputs: Vec<InputEntry>,
    pub files: FileSection,
    pub degraded: Vec<Degradation>,
}

impl ContextBundle {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Text block prepended to the user's message.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Current time: {}", self.now.to_rfc3339());
        let _ = writeln!(out, "You are: {}", self.persona);
        if let Some(name) = &self.preferred_name {
            let _ = writeln!(out, "Address the user as: {}", name);
        }
        let _ = writeln!(out, "Verbosity ({}): {}", self.verbosity.as_str(), self.verbosity.instruction());

        let snap = &self.snapshot;
        if let Some(vision) = snap.vision.as_deref().filter(|v| !v.trim().is_empty()) {
            let _ = writeln!(out, "Vision: {}", vision.trim());
        }
        write_list(&mut out, "Long-term goals", &snap.long_term_goals);
        write_list(&mut out, "Short-term goals", &snap.short_term_goals);
        write_list(&mut out, "Open tasks", &snap.open_tasks);
        write_list(&mut out, "Upcoming events", &snap.upcoming_events);

        if !self.recent_inputs.is_empty() {
            let _ = writeln!(out, "Recent inputs (newest first):");
            for entry in &self.recent_inputs {
                let _ = writeln!(
                    out,
                    "- [{}] {}",
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.text.trim()
                );
            }
        }

        match &self.files {
            FileSection::NotRequested => {
                let _ = writeln!(out, "{}", FILES_NOT_REQUESTED);
            }
            FileSection::Empty { query } => {
                let _ = writeln!(out, "{}: {}", files_heading(query.as_deref()), NO_MATCHING_FILES);
            }
            FileSection::Populated { query, files } => {
                let _ = writeln!(out, "{} (newest first):", files_heading(query.as_deref()));
                for f in files {
                    let _ = writeln!(
                        out,
                        "- {} ({} bytes, uploaded {})",
                        f.name,
                        f.size_bytes,
                        f.uploaded_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        let _ = write!(out, "Tools ({}, {}): {}", TOOL_CALCULATE, TOOL_PROPOSE_CHANGES, TOOL_USE_INSTRUCTION);
        out
    }
}

fn files_heading(query: Option<&str>) -> String {
    match query {
        Some(q) => format!("Files matching \"{}\"", q),
        None => "Files".to_string(),
    }
}

fn write_list(out: &mut String, heading: &str, items: &[String]) {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", heading);
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// Builds a [`ContextBundle`] for one turn.
pub struct ContextAssembler {
    store: Arc<dyn ProjectStore>,
    shared: Arc<dyn SharedContextSource>,
    persona_label: String,
    recent_limit: usize,
    file_limit: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        shared: Arc<dyn SharedContextSource>,
        persona_label: impl Into<String>,
        recent_limit: usize,
        file_limit: usize,
    ) -> Self {
        Self {
            store,
            shared,
            persona_label: persona_label.into(),
            recent_limit,
            file_limit,
        }
    }

    pub async fn assemble(
        &self,
        project: &Project,
        message: &str,
        verbosity: Verbosity,
        now: DateTime<Utc>,
    ) -> ContextBundle {
        let mut degraded = Vec::new();

        let shared = match self.shared.shared_context(&project.id, self.recent_limit).await {
            Ok(shared) => shared,
            Err(e) => {
                degraded.push(Degradation {
                    source: ContextSource::SharedContext,
                    reason: e.to_string(),
                });
                let recent_inputs = match self.store.recent_inputs(&project.id, self.recent_limit).await {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        degraded.push(Degradation {
                            source: ContextSource::InputLog,
                            reason: e.to_string(),
                        });
                        Vec::new()
                    }
                };
                SharedContext {
                    snapshot: DomainSnapshot::default(),
                    recent_inputs,
                }
            }
        };

        let profile = match project.owner_id.as_deref() {
            Some(owner) => match self.store.owner_profile(owner).await {
                Ok(p) => p.unwrap_or_default(),
                Err(e) => {
                    degraded.push(Degradation {
                        source: ContextSource::OwnerProfile,
                        reason: e.to_string(),
                    });
                    OwnerProfile::default()
                }
            },
            None => OwnerProfile::default(),
        };

        let files = match FileCommand::parse(message) {
            None => FileSection::NotRequested,
            Some(cmd) => match self
                .store
                .list_files(&project.id, cmd.query.as_deref(), self.file_limit)
                .await
            {
                Ok(files) if files.is_empty() => FileSection::Empty { query: cmd.query },
                Ok(files) => FileSection::Populated {
                    query: cmd.query,
                    files,
                },
                Err(e) => {
                    degraded.push(Degradation {
                        source: ContextSource::FileListing,
                        reason: e.to_string(),
                    });
                    FileSection::Empty { query: cmd.query }
                }
            },
        };

        let entry = InputEntry {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            text: message.to_string(),
            created_at: now,
            source: INPUT_SOURCE_CHAT.to_string(),
        };
        if let Err(e) = self.store.append_input(&entry).await {
            degraded.push(Degradation {
                source: ContextSource::InputLogWrite,
                reason: e.to_string(),
            });
        }

        for d in &degraded {
            tracing::warn!(
                target: "cockpit::context",
                project_id = %project.id,
                source = d.source.as_str(),
                error = %d.reason,
                "Context source degraded"
            );
        }

        ContextBundle {
            now,
            persona: profile
                .persona
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| self.persona_label.clone()),
            preferred_name: profile.preferred_name.filter(|n| !n.trim().is_empty()),
            verbosity,
            snapshot: shared.snapshot,
            recent_inputs: shared.recent_inputs,
            files,
            degraded,
        }
    }
}
