//! Project/domain store: the read/write contracts the turn pipeline depends on, and the
//! sled-backed implementation used by the gateway.
//!
//! ## Layout (one sled tree per concern)
//!
//! | Tree      | Key                                   | Value            |
//! |-----------|---------------------------------------|------------------|
//! | projects  | `{project_id}`                        | `Project`        |
//! | threads   | `{project_id}/{thread_id}`            | `ConversationThread` |
//! | domain    | `{project_id}`                        | `DomainSnapshot` |
//! | profiles  | `{owner_id}`                          | `OwnerProfile`   |
//! | inputs    | `{project_id}/{ts_ms:020}/{id}`       | `InputEntry`     |
//! | files     | `{project_id}/{id}`                   | `FileEntry`      |
//! | replies   | `{project_id}/{thread_id}/{ts_ms:020}/{id}` | `ReplyRecord` |
//!
//! Zero-padded millisecond keys keep each prefix scan in chronological order, so
//! "newest first" is a reverse scan.

use crate::error::{StoreError, StoreResult};
use crate::models::{
    ConversationThread, DomainSnapshot, FileEntry, InputEntry, OwnerProfile, Project, ReplyRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

const DEFAULT_PATH: &str = "./data/cockpit";

const TREE_PROJECTS: &str = "projects";
const TREE_THREADS: &str = "threads";
const TREE_DOMAIN: &str = "domain";
const TREE_PROFILES: &str = "profiles";
const TREE_INPUTS: &str = "inputs";
const TREE_FILES: &str = "files";
const TREE_REPLIES: &str = "replies";

/// Project, thread and domain reads/writes used by a turn.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>>;

    async fn put_project(&self, project: &Project) -> StoreResult<()>;

    /// Update the project's cached provider thread handle.
    async fn set_thread_handle(&self, project_id: &str, handle: &str) -> StoreResult<()>;

    async fn set_onboarding_complete(&self, project_id: &str, complete: bool) -> StoreResult<()>;

    /// Most recently active thread record for the project, if any.
    async fn latest_thread(&self, project_id: &str) -> StoreResult<Option<ConversationThread>>;

    async fn insert_thread(&self, thread: &ConversationThread) -> StoreResult<()>;

    /// Bump `last_active_at` on an existing record.
    async fn touch_thread(
        &self,
        project_id: &str,
        thread_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn expire_thread(&self, project_id: &str, thread_id: &str) -> StoreResult<()>;

    /// Domain snapshot; missing projects read as empty.
    async fn domain_snapshot(&self, project_id: &str) -> StoreResult<DomainSnapshot>;

    async fn put_domain_snapshot(
        &self,
        project_id: &str,
        snapshot: &DomainSnapshot,
    ) -> StoreResult<()>;

    async fn owner_profile(&self, owner_id: &str) -> StoreResult<Option<OwnerProfile>>;

    async fn put_owner_profile(&self, owner_id: &str, profile: &OwnerProfile) -> StoreResult<()>;

    /// Latest `limit` input-log entries, newest first.
    async fn recent_inputs(&self, project_id: &str, limit: usize) -> StoreResult<Vec<InputEntry>>;

    async fn append_input(&self, entry: &InputEntry) -> StoreResult<()>;

    /// Latest `limit` files, newest first, optionally filtered by a case-insensitive
    /// substring of the file name.
    async fn list_files(
        &self,
        project_id: &str,
        name_filter: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<FileEntry>>;

    async fn put_file(&self, file: &FileEntry) -> StoreResult<()>;
}

/// Assistant reply log, read and written by the persistence guard.
#[async_trait]
pub trait ReplyLog: Send + Sync {
    /// Latest `limit` rows for (project, thread, role) created at or after `since`,
    /// newest first.
    async fn recent_replies(
        &self,
        project_id: &str,
        thread_id: &str,
        role: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReplyRecord>>;

    async fn insert_reply(&self, reply: &ReplyRecord) -> StoreResult<()>;
}

/// Sled-backed store with one tree per concern.
pub struct SledStore {
    db: sled::Db,
    projects: sled::Tree,
    threads: sled::Tree,
    domain: sled::Tree,
    profiles: sled::Tree,
    inputs: sled::Tree,
    files: sled::Tree,
    replies: sled::Tree,
}

impl SledStore {
    /// Open at the default path (`./data/cockpit`).
    pub fn open() -> StoreResult<Self> {
        Self::open_path(DEFAULT_PATH)
    }

    pub fn open_path(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        Ok(Self {
            projects: db.open_tree(TREE_PROJECTS)?,
            threads: db.open_tree(TREE_THREADS)?,
            domain: db.open_tree(TREE_DOMAIN)?,
            profiles: db.open_tree(TREE_PROFILES)?,
            inputs: db.open_tree(TREE_INPUTS)?,
            files: db.open_tree(TREE_FILES)?,
            replies: db.open_tree(TREE_REPLIES)?,
            db,
        })
    }

    /// Flush dirty pages; called on gateway shutdown.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn ts_key(at: DateTime<Utc>) -> String {
    format!("{:020}", at.timestamp_millis().max(0))
}

fn put_json<T: Serialize>(tree: &sled::Tree, key: &str, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn get_json<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> StoreResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], value: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(value)
        .map_err(|_| StoreError::Corrupt(String::from_utf8_lossy(key).into_owned()))
}

#[async_trait]
impl ProjectStore for SledStore {
    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        get_json(&self.projects, project_id)
    }

    async fn put_project(&self, project: &Project) -> StoreResult<()> {
        put_json(&self.projects, &project.id, project)
    }

    async fn set_thread_handle(&self, project_id: &str, handle: &str) -> StoreResult<()> {
        let mut project: Project = get_json(&self.projects, project_id)?
            .ok_or_else(|| StoreError::NotFound(format!("project {}", project_id)))?;
        project.thread_handle = Some(handle.to_string());
        put_json(&self.projects, project_id, &project)
    }

    async fn set_onboarding_complete(&self, project_id: &str, complete: bool) -> StoreResult<()> {
        let mut project: Project = get_json(&self.projects, project_id)?
            .ok_or_else(|| StoreError::NotFound(format!("project {}", project_id)))?;
        project.onboarding_complete = complete;
        put_json(&self.projects, project_id, &project)
    }

    async fn latest_thread(&self, project_id: &str) -> StoreResult<Option<ConversationThread>> {
        let prefix = format!("{}/", project_id);
        let mut latest: Option<ConversationThread> = None;
        for item in self.threads.scan_prefix(prefix.as_bytes()) {
            let (k, v) = item?;
            let thread: ConversationThread = decode(&k, &v)?;
            let newer = latest
                .as_ref()
                .map(|cur| thread.last_active_at > cur.last_active_at)
                .unwrap_or(true);
            if newer {
                latest = Some(thread);
            }
        }
        Ok(latest)
    }

    async fn insert_thread(&self, thread: &ConversationThread) -> StoreResult<()> {
        let key = format!("{}/{}", thread.project_id, thread.id);
        put_json(&self.threads, &key, thread)
    }

    async fn touch_thread(
        &self,
        project_id: &str,
        thread_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let key = format!("{}/{}", project_id, thread_id);
        let mut thread: ConversationThread = get_json(&self.threads, &key)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", key)))?;
        thread.last_active_at = at;
        put_json(&self.threads, &key, &thread)
    }

    async fn expire_thread(&self, project_id: &str, thread_id: &str) -> StoreResult<()> {
        let key = format!("{}/{}", project_id, thread_id);
        let mut thread: ConversationThread = get_json(&self.threads, &key)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", key)))?;
        thread.expired = true;
        put_json(&self.threads, &key, &thread)
    }

    async fn domain_snapshot(&self, project_id: &str) -> StoreResult<DomainSnapshot> {
        Ok(get_json(&self.domain, project_id)?.unwrap_or_default())
    }

    async fn put_domain_snapshot(
        &self,
        project_id: &str,
        snapshot: &DomainSnapshot,
    ) -> StoreResult<()> {
        put_json(&self.domain, project_id, snapshot)
    }

    async fn owner_profile(&self, owner_id: &str) -> StoreResult<Option<OwnerProfile>> {
        get_json(&self.profiles, owner_id)
    }

    async fn put_owner_profile(&self, owner_id: &str, profile: &OwnerProfile) -> StoreResult<()> {
        put_json(&self.profiles, owner_id, profile)
    }

    async fn recent_inputs(&self, project_id: &str, limit: usize) -> StoreResult<Vec<InputEntry>> {
        let prefix = format!("{}/", project_id);
        let mut out = Vec::with_capacity(limit);
        for item in self.inputs.scan_prefix(prefix.as_bytes()).rev() {
            if out.len() >= limit {
                break;
            }
            let (k, v) = item?;
            out.push(decode(&k, &v)?);
        }
        Ok(out)
    }

    async fn append_input(&self, entry: &InputEntry) -> StoreResult<()> {
        let key = format!("{}/{}/{}", entry.project_id, ts_key(entry.created_at), entry.id);
        put_json(&self.inputs, &key, entry)
    }

    async fn list_files(
        &self,
        project_id: &str,
        name_filter: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<FileEntry>> {
        let prefix = format!("{}/", project_id);
        let needle = name_filter
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty());
        let mut files: Vec<FileEntry> = Vec::new();
        for item in self.files.scan_prefix(prefix.as_bytes()) {
            let (k, v) = item?;
            let file: FileEntry = decode(&k, &v)?;
            let keep = needle
                .as_deref()
                .map(|n| file.name.to_lowercase().contains(n))
                .unwrap_or(true);
            if keep {
                files.push(file);
            }
        }
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        files.truncate(limit);
        Ok(files)
    }

    async fn put_file(&self, file: &FileEntry) -> StoreResult<()> {
        let key = format!("{}/{}", file.project_id, file.id);
        put_json(&self.files, &key, file)
    }
}

#[async_trait]
impl ReplyLog for SledStore {
    async fn recent_replies(
        &self,
        project_id: &str,
        thread_id: &str,
        role: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReplyRecord>> {
        let prefix = format!("{}/{}/", project_id, thread_id);
        let mut out = Vec::with_capacity(limit);
        for item in self.replies.scan_prefix(prefix.as_bytes()).rev() {
            if out.len() >= limit {
                break;
            }
            let (k, v) = item?;
            let reply: ReplyRecord = decode(&k, &v)?;
            if reply.created_at < since {
                // Keys are chronological; everything further back is older still.
                break;
            }
            if reply.role == role {
                out.push(reply);
            }
        }
        Ok(out)
    }

    async fn insert_reply(&self, reply: &ReplyRecord) -> StoreResult<()> {
        let key = format!(
            "{}/{}/{}/{}",
            reply.project_id,
            reply.thread_id,
            ts_key(reply.created_at),
            reply.id
        );
        put_json(&self.replies, &key, reply)
    }
}
