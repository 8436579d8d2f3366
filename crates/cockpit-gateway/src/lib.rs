//! Cockpit gateway: HTTP surface over the turn orchestrator.
//!
//! `POST /api/chat` runs one turn and accepts either JSON or form-encoded bodies. Every
//! failure renders as `{reply: APOLOGY, error: <diagnostic>}`.

use axum::{
    body::Body,
    extract::{FromRequest, Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use cockpit_core::{TurnError, TurnOrchestrator, TurnRequest, TurnResponse, APOLOGY};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub app_name: String,
}

impl AppState {
    pub fn new(orchestrator: TurnOrchestrator, app_name: &str) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            app_name: app_name.to_string(),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/projects/:id/onboarding", get(project_onboarding))
        .route("/api/projects/:id/thread", get(project_thread))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_request))
}

async fn log_request(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::info!(
        target: "cockpit::gateway",
        %method,
        %path,
        status = response.status().as_u16(),
        "Request served"
    );
    response
}

/// Uniform error body.
pub struct ApiError(pub TurnError);

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        tracing::error!(target: "cockpit::gateway", status = status.as_u16(), error = %self.0, "Request failed");
        (
            status,
            Json(serde_json::json!({
                "reply": APOLOGY,
                "error": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

/// Turn request from a JSON or `application/x-www-form-urlencoded` body.
pub struct TurnPayload(pub TurnRequest);

#[axum::async_trait]
impl<S> FromRequest<S> for TurnPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            let Form(body) = Form::<TurnRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError(TurnError::InvalidRequest(e.body_text())))?;
            Ok(Self(body))
        } else {
            let Json(body) = Json::<TurnRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError(TurnError::InvalidRequest(e.body_text())))?;
            Ok(Self(body))
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(state): State<AppState>,
    TurnPayload(req): TurnPayload,
) -> Result<Json<TurnResponse>, ApiError> {
    let resp = state.orchestrator.handle(&req).await?;
    Ok(Json(resp))
}

async fn project_onboarding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.orchestrator.onboarding(&id).await?;
    Ok(Json(serde_json::json!({
        "projectId": id,
        "onboarding": report,
    })))
}

async fn project_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let thread = state.orchestrator.current_thread(&id).await?;
    Ok(Json(serde_json::json!({
        "projectId": id,
        "thread": thread,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::Request;
    use cockpit_core::error::{ProviderError, ToolError};
    use cockpit_core::models::{DomainSnapshot, Project};
    use cockpit_core::provider::{
        AssistantProvider, Run, RunOptions, RunStatus, ThreadMessage, ToolOutput,
    };
    use cockpit_core::store::{ProjectStore, SledStore};
    use cockpit_core::tools::{ChangeProposal, ChangeProposer};
    use cockpit_core::{CoreConfig, TurnDeps};
    use tower::ServiceExt;

    const CANNED: &str = "Focus on the client pitch first.";

    struct CannedProvider;

    #[async_trait]
    impl AssistantProvider for CannedProvider {
        async fn create_thread(&self) -> Result<String, ProviderError> {
            Ok("thread_gw".into())
        }

        async fn add_message(&self, _: &str, _: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn create_run(&self, _: &str, _: &str, _: &RunOptions) -> Result<Run, ProviderError> {
            Ok(Run {
                id: "run_gw".into(),
                status: RunStatus::Completed,
                required_action: vec![],
                last_error: None,
            })
        }

        async fn retrieve_run(&self, _: &str, run_id: &str) -> Result<Run, ProviderError> {
            Ok(Run {
                id: run_id.into(),
                status: RunStatus::Completed,
                required_action: vec![],
                last_error: None,
            })
        }

        async fn submit_tool_outputs(
            &self,
            _: &str,
            run_id: &str,
            _: &[ToolOutput],
        ) -> Result<Run, ProviderError> {
            self.retrieve_run("", run_id).await
        }

        async fn cancel_run(&self, _: &str, run_id: &str) -> Result<Run, ProviderError> {
            Ok(Run {
                id: run_id.into(),
                status: RunStatus::Cancelled,
                required_action: vec![],
                last_error: None,
            })
        }

        async fn list_messages(&self, _: &str, _: usize) -> Result<Vec<ThreadMessage>, ProviderError> {
            Ok(vec![ThreadMessage {
                id: "msg_1".into(),
                role: "assistant".into(),
                run_id: Some("run_gw".into()),
                created_at: chrono::Utc::now(),
                text: CANNED.into(),
            }])
        }
    }

    struct NoopProposer;

    #[async_trait]
    impl ChangeProposer for NoopProposer {
        async fn propose(&self, _: &ChangeProposal) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({}))
        }
    }

    async fn test_app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open_path(dir.path().join("db")).unwrap());
        store
            .put_project(&Project::new("p1", "Studio").with_agent("asst_1").with_owner("u1"))
            .await
            .unwrap();
        store
            .put_project(&Project::new("p2", "Unbound").with_owner("u1"))
            .await
            .unwrap();
        store
            .put_domain_snapshot(
                "p1",
                &DomainSnapshot {
                    vision: Some("Grow the studio".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let config = CoreConfig {
            onboarding_nudges: false,
            ..CoreConfig::default()
        };
        let deps = TurnDeps::new(
            store.clone(),
            store,
            Arc::new(CannedProvider),
            Arc::new(NoopProposer),
        );
        let state = AppState::new(TurnOrchestrator::new(deps, &config), "Cockpit Test");
        (dir, build_app(state))
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_dir, app) = test_app().await;
        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_accepts_json() {
        let (_dir, app) = test_app().await;
        let res = app
            .oneshot(post_json(serde_json::json!({
                "message": "What should I do today?",
                "projectId": "p1",
                "verbosity": "normal"
            })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["reply"], CANNED);
        assert_eq!(json["threadId"], "thread_gw");
        assert_eq!(json["onboarding"], true);
        assert_eq!(json["step"], "long_term_goals");
        assert_eq!(json["onboarding_status"], 1);
        assert_eq!(json["appended"]["text"], CANNED);
    }

    #[tokio::test]
    async fn chat_accepts_form_bodies() {
        let (_dir, app) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("message=Plan+my+week&projectId=p1&verbosity=short"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["reply"], CANNED);
    }

    #[tokio::test]
    async fn configuration_errors_render_the_apology() {
        let (_dir, app) = test_app().await;
        let res = app
            .oneshot(post_json(serde_json::json!({ "message": "hi", "projectId": "p2" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(res).await;
        assert_eq!(json["reply"], APOLOGY);
        assert!(json["error"].as_str().unwrap().contains("no bound agent"));
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let (_dir, app) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"message\": "))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["reply"], APOLOGY);

        let res = app
            .oneshot(post_json(serde_json::json!({ "message": "", "projectId": "p1" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_routes_report_onboarding_and_thread() {
        let (_dir, app) = test_app().await;

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/projects/p1/onboarding")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["onboarding"]["step"], "long_term_goals");
        assert_eq!(json["onboarding"]["statusCount"], 1);

        let res = app
            .clone()
            .oneshot(post_json(serde_json::json!({ "message": "hi", "projectId": "p1" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/projects/p1/thread")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(res).await;
        assert_eq!(json["thread"]["handle"], "thread_gw");
    }
}
