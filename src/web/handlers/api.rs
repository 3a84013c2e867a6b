use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::db::schema_manager::TableInfo;
use crate::error::AssistantError;
use crate::pipeline::history::{HistoryEntry, Session};
use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "sqlassist_session";
const DOWNLOAD_FILENAME: &str = "generated_query.sql";

// Request types

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct RunQueryRequest {
    pub sql: String,
    pub question: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

// Response types

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub total: usize,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub llm_provider: String,
    pub table_count: usize,
    pub session_count: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    sql: Option<String>,
}

/// JSON error with a status code chosen by failure kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind,
                message: message.into(),
                sql: None,
            },
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        let status = match &err {
            AssistantError::EmptyQuestion | AssistantError::RejectedSql { .. } => {
                StatusCode::BAD_REQUEST
            }
            AssistantError::UnresolvableQuery { .. }
            | AssistantError::MalformedCompletion(_)
            | AssistantError::Execution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AssistantError::TranslationUnavailable(_) => StatusCode::BAD_GATEWAY,
            AssistantError::Connection(_) | AssistantError::Internal(_) => {
                error!("Request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        Self {
            status,
            body: ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
                sql: err.sql().map(str::to_string),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// Session cookie handling

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

fn with_session_cookie(session: &Session, kept: bool, mut response: Response) -> Response {
    if session.created && kept {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, session.id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

fn respond<T: Serialize>(outcome: Result<T, AssistantError>) -> Response {
    match outcome {
        Ok(body) => Json(body).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// API Implementations

// Natural language question through the full pipeline
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Response {
    let session = state.sessions.open(session_cookie(&headers)).await;
    debug!("Session {} asked: {}", session.id, payload.question);

    // Held for the whole run so one session answers one question at a time
    let mut history = session.history.lock().await;
    let outcome = state.assistant.ask(&payload.question, &mut history).await;
    drop(history);

    let kept = state.sessions.keep(&session).await;
    with_session_cookie(&session, kept, respond(outcome))
}

// SQL edited by the user, checked but not corrected
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RunQueryRequest>,
) -> Response {
    let session = state.sessions.open(session_cookie(&headers)).await;
    info!("Running edited SQL: {}", payload.sql);

    let mut history = session.history.lock().await;
    let outcome = state
        .assistant
        .run_sql(&payload.sql, payload.question.as_deref(), &mut history)
        .await;
    drop(history);

    let kept = state.sessions.keep(&session).await;
    with_session_cookie(&session, kept, respond(outcome))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(state.config.assistant.history_display);

    let body = match state.sessions.lookup(session_cookie(&headers)).await {
        Some(history) => {
            let history = history.lock().await;
            HistoryResponse {
                total: history.len(),
                entries: history.recent(limit),
            }
        }
        None => HistoryResponse {
            total: 0,
            entries: Vec::new(),
        },
    };

    Json(body).into_response()
}

// Clearing the history ends the session
pub async fn clear_history(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(id) = session_cookie(&headers) {
        if let Some(history) = state.sessions.lookup(Some(id)).await {
            history.lock().await.clear();
            state.sessions.end(id).await;
            info!("Cleared history for session {}", id);
        }
    }

    StatusCode::NO_CONTENT.into_response()
}

pub async fn get_schema(State(state): State<Arc<AppState>>) -> Json<Vec<TableInfo>> {
    Json(state.assistant.schema().tables().cloned().collect())
}

pub async fn list_examples(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.config.assistant.examples.clone())
}

// The SQL text as a file download
pub async fn download_sql(Query(params): Query<DownloadParams>) -> Result<Response, ApiError> {
    let sql = params.sql.trim();
    if sql.is_empty() {
        return Err(ApiError::bad_request("empty_sql", "no SQL to download"));
    }

    let mut body = sql.to_string();
    body.push('\n');

    Ok((
        [
            (header::CONTENT_TYPE, "text/sql; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", DOWNLOAD_FILENAME),
            ),
        ],
        body,
    )
        .into_response())
}

// System status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        llm_provider: state.assistant.llm().provider_name().to_string(),
        table_count: state.assistant.schema().len(),
        session_count: state.sessions.count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::test_support::ScriptedProvider;
    use crate::pipeline::test_support::{assistant, settings};
    use crate::web::routes::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const VALID_SQL: &str = "SELECT coin, price FROM coins WHERE date = '2019-01-01';";

    async fn app(provider: Arc<ScriptedProvider>) -> (TempDir, axum::Router) {
        let (dir, assistant) = assistant(provider, settings()).await;
        let state = Arc::new(AppState::new(AppConfig::default(), assistant));
        (dir, router(state))
    }

    fn post_json(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sqlassist_session=abc; other=1"),
        );
        assert_eq!(session_cookie(&headers), Some("abc"));
        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_ask_sets_cookie_and_records_history() {
        let provider = Arc::new(ScriptedProvider::repeating(VALID_SQL));
        let (_dir, app) = app(provider).await;

        let response = app
            .clone()
            .oneshot(post_json("/api/ask", r#"{"question":"Bitcoin in 2019?"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .to_string();
        let cookie = set_cookie.split(';').next().unwrap().to_string();

        let report = json_body(response).await;
        assert_eq!(report["corrections"], 0);
        assert_eq!(report["candidate"]["status"], "valid");
        assert_eq!(report["result"]["rows"][0][0], "bitcoin");

        let response = app
            .oneshot(
                Request::get("/api/history")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let history = json_body(response).await;
        assert_eq!(history["total"], 1);
        assert_eq!(history["entries"][0]["question"], "Bitcoin in 2019?");
    }

    #[tokio::test]
    async fn test_error_kinds_and_statuses() {
        let provider = Arc::new(ScriptedProvider::repeating("SELECT * FROM prices;"));
        let (_dir, app) = app(provider).await;

        let response = app
            .clone()
            .oneshot(post_json("/api/ask", r#"{"question":"  "}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "empty_question");

        let response = app
            .clone()
            .oneshot(post_json("/api/ask", r#"{"question":"prices"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["kind"], "unresolvable_query");
        assert_eq!(body["sql"], "SELECT * FROM prices;");

        let response = app
            .oneshot(post_json("/api/query", r#"{"sql":"DROP TABLE coins"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "rejected_sql");
    }

    #[tokio::test]
    async fn test_translation_outage_is_bad_gateway() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let (_dir, app) = app(provider).await;

        let response = app
            .oneshot(post_json("/api/ask", r#"{"question":"anything"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(response).await["kind"], "translation_unavailable");
    }

    fn get_with_cookie(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn session_count(app: &axum::Router) -> Value {
        let status = app
            .clone()
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        json_body(status).await["session_count"].clone()
    }

    #[tokio::test]
    async fn test_clear_history() {
        let provider = Arc::new(ScriptedProvider::repeating(VALID_SQL));
        let (_dir, app) = app(provider).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/query",
                &serde_json::json!({ "sql": VALID_SQL }).to_string(),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        let cookie = set_cookie.split(';').next().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get_with_cookie("/api/history", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["total"], 1);
        assert_eq!(session_count(&app).await, 1);

        let response = app
            .clone()
            .oneshot(
                Request::delete("/api/history")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(get_with_cookie("/api/history", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["total"], 0);
        assert_eq!(session_count(&app).await, 0);
    }

    #[tokio::test]
    async fn test_history_reads_do_not_open_sessions() {
        let provider = Arc::new(ScriptedProvider::repeating("SELECT * FROM prices;"));
        let (_dir, app) = app(provider).await;

        for _ in 0..50 {
            let random = format!("{}={}", SESSION_COOKIE, uuid::Uuid::new_v4());
            for cookie in [None, Some(random.as_str())] {
                let response = app
                    .clone()
                    .oneshot(get_with_cookie("/api/history", cookie))
                    .await
                    .unwrap();
                assert!(response.headers().get(header::SET_COOKIE).is_none());
                let body = json_body(response).await;
                assert_eq!(body["total"], 0);
                assert_eq!(body["entries"].as_array().unwrap().len(), 0);

                let mut request = Request::delete("/api/history");
                if let Some(cookie) = cookie {
                    request = request.header(header::COOKIE, cookie);
                }
                let response = app
                    .clone()
                    .oneshot(request.body(Body::empty()).unwrap())
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::NO_CONTENT);
            }
        }

        // A failed run records nothing and so keeps no session either
        let response = app
            .clone()
            .oneshot(post_json("/api/ask", r#"{"question":"prices"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        assert_eq!(session_count(&app).await, 0);
    }

    #[tokio::test]
    async fn test_download_is_sql_attachment() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let (_dir, app) = app(provider).await;

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/download?sql=SELECT%20coin%20FROM%20coins")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"generated_query.sql\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"SELECT coin FROM coins\n");

        let response = app
            .oneshot(Request::get("/api/download").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_schema_examples_and_status() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let (_dir, app) = app(provider).await;

        let schema = json_body(
            app.clone()
                .oneshot(Request::get("/api/schema").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(schema[0]["name"], "coins");
        assert_eq!(schema[0]["columns"].as_array().unwrap().len(), 6);

        let examples = json_body(
            app.clone()
                .oneshot(Request::get("/api/examples").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(examples[0], "Top 5 coins by market cap in 2021");

        let status = json_body(
            app.oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status["table_count"], 1);
        assert_eq!(status["llm_provider"], "scripted");
    }

    #[tokio::test]
    async fn test_ui_and_static_assets() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let (_dir, app) = app(provider).await;

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/static/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("javascript"));

        let response = app
            .oneshot(Request::get("/static/missing.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
