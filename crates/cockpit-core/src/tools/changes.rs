//! Change proposals: the side-effecting `propose_changes` tool posts a change-set to the
//! autonomy service under a service-level credential.

use crate::error::ToolError;
use crate::models::AutonomyPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Change-set as sent to the autonomy service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub project_id: String,
    pub owner_id: String,
    pub policy: AutonomyPolicy,
    #[serde(default)]
    pub summary: Option<String>,
    pub changes: Vec<serde_json::Value>,
}

/// Receives proposed change-sets.
#[async_trait]
pub trait ChangeProposer: Send + Sync {
    /// Returns the service's acknowledgement payload.
    async fn propose(&self, proposal: &ChangeProposal) -> Result<serde_json::Value, ToolError>;
}

/// Posts proposals to `{endpoint}/proposals` with a bearer service key.
pub struct HttpChangeProposer {
    endpoint: Option<String>,
    service_key: Option<String>,
    client: reqwest::Client,
}

impl HttpChangeProposer {
    pub fn new(endpoint: Option<String>, service_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint
                .map(|e| e.trim().trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
            service_key: service_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            client,
        }
    }
}

#[async_trait]
impl ChangeProposer for HttpChangeProposer {
    async fn propose(&self, proposal: &ChangeProposal) -> Result<serde_json::Value, ToolError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ToolError::MissingCredentials("autonomy endpoint".into()))?;
        let key = self
            .service_key
            .as_deref()
            .ok_or_else(|| ToolError::MissingCredentials("autonomy service key".into()))?;

        let url = format!("{}/proposals", endpoint);
        let res = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(proposal)
            .send()
            .await
            .map_err(|e| ToolError::Endpoint(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ToolError::Endpoint(format!("{}: {}", status, body)));
        }

        tracing::info!(
            target: "cockpit::tools",
            project_id = %proposal.project_id,
            policy = proposal.policy.as_str(),
            changes = proposal.changes.len(),
            "Change proposal accepted"
        );
        // An empty or non-JSON 2xx body is still an acknowledgement.
        Ok(res
            .json::<serde_json::Value>()
            .await
            .unwrap_or_else(|_| serde_json::json!({ "accepted": true })))
    }
}

/// Apply the autonomy policy before anything leaves the process.
pub fn check_policy(policy: AutonomyPolicy) -> Result<(), ToolError> {
    match policy {
        AutonomyPolicy::Off => Err(ToolError::PolicyDenied(policy.as_str().to_string())),
        AutonomyPolicy::Shadow | AutonomyPolicy::Ask | AutonomyPolicy::Auto => Ok(()),
    }
}
