//! OpenAI Assistants v2 over reqwest.
//!
//! Endpoints used: `POST /threads`, `POST /threads/{t}/messages`, `POST /threads/{t}/runs`,
//! `GET /threads/{t}/runs/{r}`, `POST /threads/{t}/runs/{r}/submit_tool_outputs`,
//! `POST /threads/{t}/runs/{r}/cancel`, `GET /threads/{t}/messages?order=desc&limit=N`.

use super::{AssistantProvider, Run, RunOptions, RunStatus, ThreadMessage, ToolOutput};
use crate::error::ProviderError;
use crate::tools::ToolRequest;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BETA_HEADER: &str = "OpenAI-Beta";
const BETA_VALUE: &str = "assistants=v2";

#[derive(Serialize)]
struct MessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a serde_json::Value>,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    tool_outputs: &'a [ToolOutput],
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunErrorBody>,
}

#[derive(Deserialize)]
struct RequiredAction {
    submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<ToolCallBody>,
}

#[derive(Deserialize)]
struct ToolCallBody {
    id: String,
    function: FunctionBody,
}

#[derive(Deserialize)]
struct FunctionBody {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct RunErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<MessageBody>,
}

#[derive(Deserialize)]
struct MessageBody {
    id: String,
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextBody>,
}

#[derive(Deserialize)]
struct TextBody {
    value: String,
}

impl From<RunResponse> for Run {
    fn from(r: RunResponse) -> Self {
        Run {
            id: r.id,
            status: r.status,
            required_action: r
                .required_action
                .map(|a| {
                    a.submit_tool_outputs
                        .tool_calls
                        .into_iter()
                        .map(|c| ToolRequest {
                            id: c.id,
                            name: c.function.name,
                            arguments: c.function.arguments,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            last_error: r.last_error.map(|e| format!("{}: {}", e.code, e.message)),
        }
    }
}

impl From<MessageBody> for ThreadMessage {
    fn from(m: MessageBody) -> Self {
        let text = m
            .content
            .into_iter()
            .filter(|p| p.kind == "text")
            .filter_map(|p| p.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n");
        ThreadMessage {
            id: m.id,
            role: m.role,
            run_id: m.run_id.filter(|r| !r.is_empty()),
            created_at: Utc
                .timestamp_opt(m.created_at, 0)
                .single()
                .unwrap_or_default(),
            text,
        }
    }
}

/// Assistants API client bound to one API key and base URL.
pub struct OpenAiAssistants {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiAssistants {
    /// `api_key` may be absent; every call then fails with `NotConfigured`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("OPENAI_API_KEY is not set".into()))?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(key)
            .header(BETA_HEADER, BETA_VALUE))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let res = builder.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::warn!(
                target: "cockpit::provider",
                status = status.as_u16(),
                "Provider call rejected"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        res.json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AssistantProvider for OpenAiAssistants {
    async fn create_thread(&self) -> Result<String, ProviderError> {
        let req = self
            .request(reqwest::Method::POST, "/threads")?
            .json(&serde_json::json!({}));
        let created: IdResponse = self.send(req).await?;
        tracing::debug!(target: "cockpit::provider", thread = %created.id, "Thread created");
        Ok(created.id)
    }

    async fn add_message(&self, thread: &str, content: &str) -> Result<(), ProviderError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/threads/{}/messages", thread))?
            .json(&MessageRequest {
                role: "user",
                content,
            });
        let _: IdResponse = self.send(req).await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread: &str,
        assistant_id: &str,
        options: &RunOptions,
    ) -> Result<Run, ProviderError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/threads/{}/runs", thread))?
            .json(&RunRequest {
                assistant_id,
                model: options.model.as_deref(),
                additional_instructions: options.additional_instructions.as_deref(),
                tools: options.tools.as_ref(),
            });
        let run: RunResponse = self.send(req).await?;
        Ok(run.into())
    }

    async fn retrieve_run(&self, thread: &str, run_id: &str) -> Result<Run, ProviderError> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/threads/{}/runs/{}", thread, run_id),
        )?;
        let run: RunResponse = self.send(req).await?;
        Ok(run.into())
    }

    async fn submit_tool_outputs(
        &self,
        thread: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ProviderError> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{}/runs/{}/submit_tool_outputs", thread, run_id),
            )?
            .json(&SubmitRequest {
                tool_outputs: outputs,
            });
        let run: RunResponse = self.send(req).await?;
        Ok(run.into())
    }

    async fn cancel_run(&self, thread: &str, run_id: &str) -> Result<Run, ProviderError> {
        let req = self.request(
            reqwest::Method::POST,
            &format!("/threads/{}/runs/{}/cancel", thread, run_id),
        )?;
        let run: RunResponse = self.send(req).await?;
        Ok(run.into())
    }

    async fn list_messages(
        &self,
        thread: &str,
        limit: usize,
    ) -> Result<Vec<ThreadMessage>, ProviderError> {
        let req = self
            .request(
                reqwest::Method::GET,
                &format!("/threads/{}/messages", thread),
            )?
            .query(&[("order", "desc".to_string()), ("limit", limit.to_string())]);
        let list: MessageList = self.send(req).await?;
        Ok(list.data.into_iter().map(ThreadMessage::from).collect())
    }
}
