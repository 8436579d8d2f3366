//! Reply persistence guard: the only idempotency boundary of a turn.
//!
//! A reply whose text matches a row written for the same (project, thread) inside the
//! dedup window reuses that row. Store failures never fail the turn; the caller gets an
//! in-memory record tagged `fallback`.

use crate::dispatch::NO_REPLY;
use crate::error::StoreError;
use crate::models::{ReplyRecord, CONTENT_TYPE_MARKDOWN, ROLE_ASSISTANT};
use crate::store::ReplyLog;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Decides whether an existing row is the same reply as the candidate text.
pub trait ReplyMatcher: Send + Sync {
    fn matches(&self, existing: &ReplyRecord, text: &str) -> bool;
}

/// Exact string equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactText;

impl ReplyMatcher for ExactText {
    fn matches(&self, existing: &ReplyRecord, text: &str) -> bool {
        existing.text == text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOrigin {
    Inserted,
    Reused,
    /// Store failed; the record only exists in memory.
    Fallback,
    /// Sentinel text; nothing written.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub record: Option<ReplyRecord>,
    pub origin: PersistOrigin,
}

pub struct ReplyGuard {
    log: Arc<dyn ReplyLog>,
    matcher: Arc<dyn ReplyMatcher>,
    window: chrono::Duration,
    scan_limit: usize,
}

impl ReplyGuard {
    pub fn new(
        log: Arc<dyn ReplyLog>,
        matcher: Arc<dyn ReplyMatcher>,
        window: chrono::Duration,
        scan_limit: usize,
    ) -> Self {
        Self {
            log,
            matcher,
            window,
            scan_limit,
        }
    }

    pub async fn persist(
        &self,
        project_id: &str,
        thread_id: &str,
        text: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> PersistOutcome {
        if text == NO_REPLY {
            return PersistOutcome {
                record: None,
                origin: PersistOrigin::Skipped,
            };
        }

        let record = ReplyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            thread_id: thread_id.to_string(),
            role: ROLE_ASSISTANT.to_string(),
            text: text.to_string(),
            created_at: now,
            content_type: CONTENT_TYPE_MARKDOWN.to_string(),
            metadata,
        };

        match self.write(&record, now).await {
            Ok(Some(existing)) => {
                tracing::info!(
                    target: "cockpit::persist",
                    project_id,
                    reply_id = %existing.id,
                    "Duplicate reply inside dedup window; reusing row"
                );
                PersistOutcome {
                    record: Some(existing),
                    origin: PersistOrigin::Reused,
                }
            }
            Ok(None) => PersistOutcome {
                record: Some(record),
                origin: PersistOrigin::Inserted,
            },
            Err(e) => {
                tracing::error!(
                    target: "cockpit::persist",
                    project_id,
                    thread_id,
                    error = %e,
                    "Reply write failed; returning in-memory fallback"
                );
                PersistOutcome {
                    record: Some(fallback(record, &e)),
                    origin: PersistOrigin::Fallback,
                }
            }
        }
    }

    /// Returns the matching existing row, or `None` after inserting `record`.
    async fn write(
        &self,
        record: &ReplyRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<ReplyRecord>, StoreError> {
        let recent = self
            .log
            .recent_replies(
                &record.project_id,
                &record.thread_id,
                ROLE_ASSISTANT,
                now - self.window,
                self.scan_limit,
            )
            .await?;
        if let Some(existing) = recent
            .into_iter()
            .find(|r| self.matcher.matches(r, &record.text))
        {
            return Ok(Some(existing));
        }
        self.log.insert_reply(record).await?;
        Ok(None)
    }
}

fn fallback(mut record: ReplyRecord, err: &StoreError) -> ReplyRecord {
    let mut meta = match record.metadata {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    meta.insert("fallback".into(), serde_json::Value::Bool(true));
    meta.insert("reason".into(), serde_json::Value::String(err.to_string()));
    record.metadata = serde_json::Value::Object(meta);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryLog {
        rows: Mutex<Vec<ReplyRecord>>,
        fail_insert: bool,
    }

    #[async_trait]
    impl ReplyLog for MemoryLog {
        async fn recent_replies(
            &self,
            project_id: &str,
            thread_id: &str,
            role: &str,
            since: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<ReplyRecord>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .rev()
                .filter(|r| r.project_id == project_id && r.thread_id == thread_id)
                .filter(|r| r.role == role && r.created_at >= since)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn insert_reply(&self, reply: &ReplyRecord) -> Result<(), StoreError> {
            if self.fail_insert {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.rows.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    fn guard(log: Arc<MemoryLog>) -> ReplyGuard {
        ReplyGuard::new(log, Arc::new(ExactText), chrono::Duration::minutes(3), 10)
    }

    #[tokio::test]
    async fn same_text_inside_window_reuses_row() {
        let log = Arc::new(MemoryLog::default());
        let g = guard(log.clone());
        let t0 = Utc::now();
        let first = g.persist("p", "t", "Hi there", serde_json::json!({}), t0).await;
        let second = g
            .persist("p", "t", "Hi there", serde_json::json!({}), t0 + chrono::Duration::seconds(90))
            .await;
        assert_eq!(first.origin, PersistOrigin::Inserted);
        assert_eq!(second.origin, PersistOrigin::Reused);
        assert_eq!(first.record.unwrap().id, second.record.unwrap().id);
        assert_eq!(log.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_text_after_window_inserts_again() {
        let log = Arc::new(MemoryLog::default());
        let g = guard(log.clone());
        let t0 = Utc::now();
        g.persist("p", "t", "Hi", serde_json::json!({}), t0).await;
        let later = g
            .persist("p", "t", "Hi", serde_json::json!({}), t0 + chrono::Duration::minutes(4))
            .await;
        assert_eq!(later.origin, PersistOrigin::Inserted);
        assert_eq!(log.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sentinel_is_never_written() {
        let log = Arc::new(MemoryLog::default());
        let out = guard(log.clone())
            .persist("p", "t", NO_REPLY, serde_json::json!({}), Utc::now())
            .await;
        assert_eq!(out.origin, PersistOrigin::Skipped);
        assert!(out.record.is_none());
        assert!(log.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_yields_tagged_fallback() {
        let log = Arc::new(MemoryLog {
            fail_insert: true,
            ..Default::default()
        });
        let out = guard(log)
            .persist("p", "t", "Hi", serde_json::json!({ "run_id": "run_1" }), Utc::now())
            .await;
        assert_eq!(out.origin, PersistOrigin::Fallback);
        let record = out.record.unwrap();
        assert_eq!(record.metadata["fallback"], serde_json::json!(true));
        assert_eq!(record.metadata["run_id"], serde_json::json!("run_1"));
        assert!(record.metadata["reason"].as_str().unwrap().contains("disk full"));
    }
}
