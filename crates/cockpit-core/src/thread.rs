//! Conversation thread lifecycle: reuse the active provider thread while it is fresh,
//! otherwise open a new one.

use crate::error::TurnError;
use crate::models::ConversationThread;
use crate::provider::AssistantProvider;
use crate::store::ProjectStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// How the thread for this turn was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOrigin {
    Reused,
    Created,
}

#[derive(Debug, Clone)]
pub struct ResolvedThread {
    pub record: ConversationThread,
    pub origin: ThreadOrigin,
}

impl ResolvedThread {
    pub fn handle(&self) -> &str {
        &self.record.handle
    }
}

pub struct ThreadManager {
    store: Arc<dyn ProjectStore>,
    provider: Arc<dyn AssistantProvider>,
    idle: chrono::Duration,
}

impl ThreadManager {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        provider: Arc<dyn AssistantProvider>,
        idle: chrono::Duration,
    ) -> Self {
        Self {
            store,
            provider,
            idle,
        }
    }

    /// Return a usable thread for `project_id` at `now`. Provider thread creation failures
    /// are returned as-is and not retried. Bumping `last_active_at` and caching the handle
    /// on the project are best-effort.
    pub async fn resolve(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedThread, TurnError> {
        let current = self.store.latest_thread(project_id).await?;

        if let Some(mut record) = current {
            let reusable = !record.handle.trim().is_empty() && !record.is_stale(now, self.idle);
            if reusable {
                if let Err(e) = self.store.touch_thread(project_id, &record.id, now).await {
                    tracing::warn!(
                        target: "cockpit::thread",
                        project_id,
                        thread = %record.handle,
                        error = %e,
                        "Failed to record thread activity"
                    );
                }
                record.last_active_at = now;
                tracing::debug!(
                    target: "cockpit::thread",
                    project_id,
                    thread = %record.handle,
                    "Reusing thread"
                );
                return Ok(ResolvedThread {
                    record,
                    origin: ThreadOrigin::Reused,
                });
            }
            tracing::info!(
                target: "cockpit::thread",
                project_id,
                previous = %record.id,
                expired = record.expired,
                idle_secs = now.signed_duration_since(record.last_active_at).num_seconds(),
                "Thread stale; opening a new one"
            );
        }

        let handle = self.provider.create_thread().await?;
        let record = ConversationThread {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            handle,
            created_at: now,
            last_active_at: now,
            expired: false,
        };
        self.store.insert_thread(&record).await?;
        if let Err(e) = self.store.set_thread_handle(project_id, &record.handle).await {
            tracing::warn!(
                target: "cockpit::thread",
                project_id,
                thread = %record.handle,
                error = %e,
                "Failed to cache thread handle on project"
            );
        }
        tracing::info!(
            target: "cockpit::thread",
            project_id,
            thread = %record.handle,
            "Thread created"
        );
        Ok(ResolvedThread {
            record,
            origin: ThreadOrigin::Created,
        })
    }
}
