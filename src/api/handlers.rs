//! HTTP request handlers

use super::types::{
    ChatRequest, ChatResponse, ErrorResponse, HistoryQuery, HistoryResponse, LanguageRequest,
    PurgeResponse, StatusResponse,
};
use super::AppState;
use crate::runtime::{validate_user_id, OrchestratorError, StatusSnapshot};
use crate::store::{StoreError, StoreStats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Messaging
        .route("/whatsapp/chat", post(chat))
        .route("/whatsapp/reset/:user_id", post(reset_session))
        .route("/whatsapp/status/:user_id", get(session_status))
        .route("/whatsapp/language/:user_id", put(set_language))
        .route("/whatsapp/history/:user_id", get(history))
        // Operations
        .route("/stats", get(stats))
        .route("/admin/purge", post(purge))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Messaging
// ============================================================

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let reply = state
        .orchestrator
        .handle(&req.user_id, &req.user_input)
        .await?;

    Ok(Json(ChatResponse {
        status: "success",
        response: reply.text,
        session: reply.status,
    }))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(state.orchestrator.reset(&user_id).await?))
}

async fn session_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let session = state.orchestrator.status(&user_id).await?;
    Ok(Json(StatusResponse {
        exists: session.is_some(),
        session,
    }))
}

async fn set_language(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<LanguageRequest>,
) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(
        state
            .orchestrator
            .set_language(&user_id, req.language)
            .await?,
    ))
}

async fn history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let user_id = validate_user_id(&user_id)?.to_string();
    let log = state
        .audit_log
        .clone()
        .ok_or_else(|| AppError::NotFound("Interaction history is disabled".to_string()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    // rusqlite blocks
    let lookup_id = user_id.clone();
    let interactions = tokio::task::spawn_blocking(move || log.recent_for_user(&lookup_id, limit))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(HistoryResponse {
        user_id,
        interactions,
    }))
}

// ============================================================
// Operations
// ============================================================

async fn stats(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.orchestrator.stats().await)
}

async fn purge(State(state): State<AppState>) -> Result<Json<PurgeResponse>, AppError> {
    let deleted = state.orchestrator.purge_all().await?;
    Ok(Json(PurgeResponse { deleted }))
}

async fn get_version() -> &'static str {
    concat!("questionnaire-service ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::InvalidUserId(_) => AppError::BadRequest(e.to_string()),
            OrchestratorError::VersionConflict { .. } => AppError::Conflict(e.to_string()),
            OrchestratorError::Store(StoreError::Unavailable(_)) => {
                AppError::Unavailable(e.to_string())
            }
            OrchestratorError::Store(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AuditLog, SqliteAuditSink};
    use crate::language::{KeywordDetector, Language, LanguageResolver};
    use crate::questionnaire::Questionnaire;
    use crate::router::{HeuristicClassifier, IntentRouter};
    use crate::runtime::testing::{MockContextLookup, MockRetriever};
    use crate::runtime::{Capabilities, Orchestrator, OrchestratorSettings};
    use crate::store::{SessionStore, StoreSettings};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, AuditLog) {
        let log = AuditLog::open_in_memory().unwrap();
        let store = SessionStore::memory_only(StoreSettings {
            key_prefix: "api:user:".to_string(),
            ttl: Duration::from_secs(3600),
            timeout: Duration::from_millis(500),
            retry_after: Duration::from_secs(30),
        });
        let capabilities = Capabilities {
            router: IntentRouter::new(
                Arc::new(HeuristicClassifier),
                Arc::new(MockRetriever::new()),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ),
            resolver: LanguageResolver::new(
                Arc::new(KeywordDetector),
                Language::Fr,
                Duration::from_secs(1),
            ),
            contacts: Arc::new(MockContextLookup::new(None)),
            audit: Arc::new(SqliteAuditSink::new(log.clone())),
        };
        let orchestrator = Orchestrator::new(
            Arc::new(store),
            capabilities,
            Arc::new(Questionnaire::default()),
            OrchestratorSettings::default(),
        );
        let state = AppState::new(Arc::new(orchestrator), Some(log.clone()));
        (create_router(state), log)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_chat_flow() {
        let (app, _log) = app();

        let (status, body) = send(
            &app,
            "POST",
            "/whatsapp/chat",
            Some(json!({"user_id": "33600000001", "user_input": "Bonjour"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["response"].as_str().unwrap().contains("Question 1/8"));
        assert_eq!(body["session"]["phase"]["type"], "await_answer");
        assert_eq!(body["session"]["language"], "fr");
        assert_eq!(body["session"]["degraded_persistence"], false);

        let (status, body) = send(&app, "GET", "/whatsapp/status/33600000001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exists"], true);
        assert_eq!(body["session"]["question_index"], 0);
    }

    #[tokio::test]
    async fn test_status_of_unknown_user() {
        let (app, _log) = app();
        let (status, body) = send(&app, "GET", "/whatsapp/status/nobody", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"exists": false}));
    }

    #[tokio::test]
    async fn test_blank_user_id_is_rejected() {
        let (app, _log) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/whatsapp/chat",
            Some(json!({"user_id": " ", "user_input": "Bonjour"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid user id"));
    }

    #[tokio::test]
    async fn test_language_reset_and_purge() {
        let (app, _log) = app();

        let (status, body) = send(
            &app,
            "PUT",
            "/whatsapp/language/u1",
            Some(json!({"language": "es"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["language"], "es");

        let (status, _) = send(
            &app,
            "PUT",
            "/whatsapp/language/u1",
            Some(json!({"language": "de"})),
        )
        .await;
        assert!(status.is_client_error());

        let (status, body) = send(&app, "POST", "/whatsapp/reset/u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"]["type"], "not_started");

        let (_, body) = send(&app, "GET", "/stats", None).await;
        assert_eq!(body["active_count"], 0);
        assert_eq!(body["backend_mode"], "memory");

        send(
            &app,
            "POST",
            "/whatsapp/chat",
            Some(json!({"user_id": "u2", "user_input": "Hola"})),
        )
        .await;
        let (_, body) = send(&app, "POST", "/admin/purge", None).await;
        assert_eq!(body["deleted"], 1);
    }

    #[tokio::test]
    async fn test_history_lists_recorded_interactions() {
        let (app, log) = app();
        send(
            &app,
            "POST",
            "/whatsapp/chat",
            Some(json!({"user_id": "u1", "user_input": "Bonjour"})),
        )
        .await;

        // The audit record is written by a detached task
        for _ in 0..200 {
            if log.count().unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (status, body) = send(&app, "GET", "/whatsapp/history/u1?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        let interactions = body["interactions"].as_array().unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0]["message_text"], "Bonjour");
        assert_eq!(interactions[0]["phase_after"], "await_answer(1)");

        // Same id normalization as the other routes
        let (status, body) = send(&app, "GET", "/whatsapp/history/%20u1%20", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "u1");
        assert_eq!(body["interactions"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "GET", "/whatsapp/history/%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
