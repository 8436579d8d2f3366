#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cockpit_core::error::{ProviderError, StoreError, ToolError};
use cockpit_core::models::{
    ConversationThread, DomainSnapshot, FileEntry, InputEntry, OwnerProfile, Project,
};
use cockpit_core::provider::{
    AssistantProvider, Run, RunOptions, RunStatus, ThreadMessage, ToolOutput,
};
use cockpit_core::store::{ProjectStore, SledStore};
use cockpit_core::tools::{ChangeProposal, ChangeProposer, ToolRequest};
use cockpit_core::{CoreConfig, TurnDeps, TurnOrchestrator};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const REPLY: &str = "Block Tuesday morning for the proposal draft.";

/// In-process assistant provider. Every run completes with `reply` after one poll, or asks
/// for the queued tool calls first when any are set.
///
/// `repeat_tool_round` makes the run ask for the same calls again after outputs are
/// submitted; `stall_runs` keeps every run in progress forever.
pub struct FakeProvider {
    threads: AtomicUsize,
    runs: AtomicUsize,
    pub reply: Mutex<String>,
    pub tool_calls: Mutex<Option<Vec<ToolRequest>>>,
    pub fail_runs: Mutex<bool>,
    pub repeat_tool_round: Mutex<bool>,
    pub stall_runs: Mutex<bool>,
    pub inputs: Mutex<Vec<String>>,
    pub run_options: Mutex<Vec<RunOptions>>,
    pub submitted: Mutex<Vec<ToolOutput>>,
    pub cancelled: Mutex<Vec<String>>,
    messages: Mutex<HashMap<String, Vec<ThreadMessage>>>,
    run_threads: Mutex<HashMap<String, String>>,
    run_calls: Mutex<HashMap<String, Vec<ToolRequest>>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            threads: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            reply: Mutex::new(REPLY.to_string()),
            tool_calls: Mutex::new(None),
            fail_runs: Mutex::new(false),
            repeat_tool_round: Mutex::new(false),
            stall_runs: Mutex::new(false),
            inputs: Mutex::new(Vec::new()),
            run_options: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            run_threads: Mutex::new(HashMap::new()),
            run_calls: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeProvider {
    pub fn threads_created(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }

    pub fn runs_created(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> String {
        self.inputs.lock().unwrap().last().cloned().unwrap_or_default()
    }

    fn push_message(&self, thread: &str, role: &str, run_id: Option<&str>, text: &str) {
        let mut messages = self.messages.lock().unwrap();
        let list = messages.entry(thread.to_string()).or_default();
        let n = list.len() as i64;
        list.push(ThreadMessage {
            id: format!("msg_{}", n + 1),
            role: role.to_string(),
            run_id: run_id.map(String::from),
            created_at: Utc.timestamp_opt(1_767_225_600 + n, 0).unwrap(),
            text: text.to_string(),
        });
    }

    pub fn cancelled_runs(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn complete(&self, thread: &str, run_id: &str) -> Run {
        if *self.stall_runs.lock().unwrap() {
            return Run {
                id: run_id.to_string(),
                status: RunStatus::InProgress,
                required_action: vec![],
                last_error: None,
            };
        }
        if *self.fail_runs.lock().unwrap() {
            return Run {
                id: run_id.to_string(),
                status: RunStatus::Failed,
                required_action: vec![],
                last_error: Some("server_error: model overloaded".into()),
            };
        }
        let already = self
            .messages
            .lock()
            .unwrap()
            .get(thread)
            .map(|l| l.iter().any(|m| m.run_id.as_deref() == Some(run_id)))
            .unwrap_or(false);
        if !already {
            let reply = self.reply.lock().unwrap().clone();
            self.push_message(thread, "assistant", Some(run_id), &reply);
        }
        Run {
            id: run_id.to_string(),
            status: RunStatus::Completed,
            required_action: vec![],
            last_error: None,
        }
    }
}

#[async_trait]
impl AssistantProvider for FakeProvider {
    async fn create_thread(&self) -> Result<String, ProviderError> {
        let n = self.threads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("thread_{}", n))
    }

    async fn add_message(&self, thread: &str, content: &str) -> Result<(), ProviderError> {
        self.inputs.lock().unwrap().push(content.to_string());
        self.push_message(thread, "user", None, content);
        Ok(())
    }

    async fn create_run(
        &self,
        thread: &str,
        _assistant_id: &str,
        options: &RunOptions,
    ) -> Result<Run, ProviderError> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("run_{}", n);
        self.run_options.lock().unwrap().push(options.clone());
        self.run_threads
            .lock()
            .unwrap()
            .insert(id.clone(), thread.to_string());
        if let Some(calls) = self.tool_calls.lock().unwrap().take() {
            self.run_calls
                .lock()
                .unwrap()
                .insert(id.clone(), calls.clone());
            return Ok(Run {
                id,
                status: RunStatus::RequiresAction,
                required_action: calls,
                last_error: None,
            });
        }
        Ok(Run {
            id,
            status: RunStatus::Queued,
            required_action: vec![],
            last_error: None,
        })
    }

    async fn retrieve_run(&self, thread: &str, run_id: &str) -> Result<Run, ProviderError> {
        Ok(self.complete(thread, run_id))
    }

    async fn submit_tool_outputs(
        &self,
        _thread: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ProviderError> {
        self.submitted.lock().unwrap().extend_from_slice(outputs);
        if *self.repeat_tool_round.lock().unwrap() {
            let calls = self
                .run_calls
                .lock()
                .unwrap()
                .get(run_id)
                .cloned()
                .unwrap_or_default();
            return Ok(Run {
                id: run_id.to_string(),
                status: RunStatus::RequiresAction,
                required_action: calls,
                last_error: None,
            });
        }
        Ok(Run {
            id: run_id.to_string(),
            status: RunStatus::InProgress,
            required_action: vec![],
            last_error: None,
        })
    }

    async fn cancel_run(&self, _thread: &str, run_id: &str) -> Result<Run, ProviderError> {
        self.cancelled.lock().unwrap().push(run_id.to_string());
        Ok(Run {
            id: run_id.to_string(),
            status: RunStatus::Cancelling,
            required_action: vec![],
            last_error: None,
        })
    }

    async fn list_messages(
        &self,
        thread: &str,
        limit: usize,
    ) -> Result<Vec<ThreadMessage>, ProviderError> {
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .get(thread)
            .map(|l| l.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeProposer {
    pub proposals: Mutex<Vec<ChangeProposal>>,
}

#[async_trait]
impl ChangeProposer for FakeProposer {
    async fn propose(&self, proposal: &ChangeProposal) -> Result<serde_json::Value, ToolError> {
        self.proposals.lock().unwrap().push(proposal.clone());
        Ok(serde_json::json!({ "status": "pending_confirmation" }))
    }
}

/// Sled-backed store that refuses the operations named in `failing`.
pub struct FlakyStore {
    inner: Arc<SledStore>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SledStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    fn check(&self, op: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(op) {
            return Err(StoreError::Unavailable(format!("{} refused", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for FlakyStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, StoreError> {
        self.check("get_project")?;
        self.inner.get_project(project_id).await
    }

    async fn put_project(&self, project: &Project) -> Result<(), StoreError> {
        self.check("put_project")?;
        self.inner.put_project(project).await
    }

    async fn set_thread_handle(&self, project_id: &str, handle: &str) -> Result<(), StoreError> {
        self.check("set_thread_handle")?;
        self.inner.set_thread_handle(project_id, handle).await
    }

    async fn set_onboarding_complete(
        &self,
        project_id: &str,
        complete: bool,
    ) -> Result<(), StoreError> {
        self.check("set_onboarding_complete")?;
        self.inner.set_onboarding_complete(project_id, complete).await
    }

    async fn latest_thread(
        &self,
        project_id: &str,
    ) -> Result<Option<ConversationThread>, StoreError> {
        self.check("latest_thread")?;
        self.inner.latest_thread(project_id).await
    }

    async fn insert_thread(&self, thread: &ConversationThread) -> Result<(), StoreError> {
        self.check("insert_thread")?;
        self.inner.insert_thread(thread).await
    }

    async fn touch_thread(
        &self,
        project_id: &str,
        thread_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check("touch_thread")?;
        self.inner.touch_thread(project_id, thread_id, at).await
    }

    async fn expire_thread(&self, project_id: &str, thread_id: &str) -> Result<(), StoreError> {
        self.check("expire_thread")?;
        self.inner.expire_thread(project_id, thread_id).await
    }

    async fn domain_snapshot(&self, project_id: &str) -> Result<DomainSnapshot, StoreError> {
        self.check("domain_snapshot")?;
        self.inner.domain_snapshot(project_id).await
    }

    async fn put_domain_snapshot(
        &self,
        project_id: &str,
        snapshot: &DomainSnapshot,
    ) -> Result<(), StoreError> {
        self.check("put_domain_snapshot")?;
        self.inner.put_domain_snapshot(project_id, snapshot).await
    }

    async fn owner_profile(&self, owner_id: &str) -> Result<Option<OwnerProfile>, StoreError> {
        self.check("owner_profile")?;
        self.inner.owner_profile(owner_id).await
    }

    async fn put_owner_profile(
        &self,
        owner_id: &str,
        profile: &OwnerProfile,
    ) -> Result<(), StoreError> {
        self.check("put_owner_profile")?;
        self.inner.put_owner_profile(owner_id, profile).await
    }

    async fn recent_inputs(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<InputEntry>, StoreError> {
        self.check("recent_inputs")?;
        self.inner.recent_inputs(project_id, limit).await
    }

    async fn append_input(&self, entry: &InputEntry) -> Result<(), StoreError> {
        self.check("append_input")?;
        self.inner.append_input(entry).await
    }

    async fn list_files(
        &self,
        project_id: &str,
        name_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FileEntry>, StoreError> {
        self.check("list_files")?;
        self.inner.list_files(project_id, name_filter, limit).await
    }

    async fn put_file(&self, file: &FileEntry) -> Result<(), StoreError> {
        self.check("put_file")?;
        self.inner.put_file(file).await
    }
}

/// `store` is the raw sled store for seeding and inspection; the orchestrator reads
/// projects through `flaky`, which wraps it.
pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub store: Arc<SledStore>,
    pub flaky: Arc<FlakyStore>,
    pub provider: Arc<FakeProvider>,
    pub proposer: Arc<FakeProposer>,
    pub orchestrator: TurnOrchestrator,
}

pub fn config() -> CoreConfig {
    CoreConfig {
        poll_interval_ms: 10,
        run_deadline_secs: 5,
        ..CoreConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(config(), |deps| deps)
}

pub fn harness_with(cfg: CoreConfig, customize: impl FnOnce(TurnDeps) -> TurnDeps) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open_path(dir.path().join("cockpit")).unwrap());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let provider = Arc::new(FakeProvider::default());
    let proposer = Arc::new(FakeProposer::default());
    let deps = customize(TurnDeps::new(
        flaky.clone(),
        store.clone(),
        provider.clone(),
        proposer.clone(),
    ));
    let orchestrator = TurnOrchestrator::new(deps, &cfg);
    Harness {
        _dir: dir,
        store,
        flaky,
        provider,
        proposer,
        orchestrator,
    }
}

pub fn bound_project(id: &str) -> Project {
    Project::new(id, "Studio").with_agent("asst_1").with_owner("owner_1")
}

pub async fn seed(h: &Harness, project: Project) {
    h.store.put_project(&project).await.unwrap();
}

pub fn at(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, min, 0).unwrap()
}
