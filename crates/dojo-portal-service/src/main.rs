use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use dojo_portal_api::{
    AdminActivity, ApiError, LoginEventOutcome, LoginEventRequest, MigrateResult, PortalApi,
    ProfileResponse, ProgressResponse, RecordProgressRequest, RecordProgressResponse,
    TestApplicationResponse, API_CONTRACT_VERSION, DEFAULT_TOKEN_TTL_HOURS,
};
use dojo_portal_core::BeltTestApplication;
use dojo_portal_store_sqlite::SchemaStatus;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Clone)]
struct ServiceState {
    api: PortalApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminActivityQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    admin_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "dojo-portal-service")]
#[command(about = "HTTP service backing the dojo student portal")]
struct Args {
    #[arg(long, env = "DOJO_PORTAL_DB", default_value = "./dojo_portal.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "DOJO_PORTAL_BIND", default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
    #[arg(long, env = "DOJO_PORTAL_ADMIN_KEY")]
    admin_key: Option<String>,
    #[arg(long, env = "DOJO_PORTAL_TOKEN_TTL_HOURS", default_value_t = DEFAULT_TOKEN_TTL_HOURS)]
    token_ttl_hours: i64,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(inner) => {
                tracing::error!(error = %format!("{inner:#}"), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match err {
            ApiError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        ServiceState::error(status, message)
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/portal/login-event", post(portal_login_event))
        .route("/portal/profile", get(portal_profile))
        .route("/portal/progress", post(portal_record_progress))
        .route("/portal/progress/:student_id", get(portal_progress))
        .route("/portal/test-applications", post(portal_test_application))
        .route("/portal/admin/activity", get(portal_admin_activity))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let api = PortalApi::new(args.db.clone())
        .with_admin_key(args.admin_key)
        .with_token_ttl(time::Duration::hours(args.token_ttl_hours.max(1)));
    let migrated = api.migrate(false)?;
    tracing::info!(
        db = %args.db.display(),
        schema_version = ?migrated.after_version,
        "portal database ready"
    );

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "dojo portal service listening");
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(ApiError::from)?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = state.api.migrate(request.dry_run).map_err(ApiError::from)?;
    Ok(Json(envelope(result)))
}

async fn portal_login_event(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<LoginEventRequest>,
) -> Result<Json<LoginEventOutcome>, ServiceError> {
    let outcome = state.api.login_event(&request, bearer_token(&headers))?;
    Ok(Json(outcome))
}

async fn portal_profile(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, ServiceError> {
    Ok(Json(state.api.profile(bearer_token(&headers))?))
}

async fn portal_progress(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Json<ProgressResponse>, ServiceError> {
    Ok(Json(state.api.progress(bearer_token(&headers), &student_id)?))
}

async fn portal_record_progress(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<RecordProgressRequest>,
) -> Result<Json<RecordProgressResponse>, ServiceError> {
    Ok(Json(state.api.record_progress(bearer_token(&headers), &request)?))
}

async fn portal_test_application(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(application): Json<BeltTestApplication>,
) -> Result<Json<TestApplicationResponse>, ServiceError> {
    Ok(Json(state.api.submit_test_application(bearer_token(&headers), &application)?))
}

async fn portal_admin_activity(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<AdminActivityQuery>,
) -> Result<Json<AdminActivity>, ServiceError> {
    let header_key = headers.get(ADMIN_KEY_HEADER).and_then(|value| value.to_str().ok());
    let activity = state.api.admin_activity(&[header_key, query.admin_key.as_deref()], query.limit)?;
    Ok(Json(activity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use dojo_portal_api::RosterEntry;
    use http::Request;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("dojo-portal-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn seeded_router(db_path: &std::path::Path) -> Router {
        let api = PortalApi::new(db_path.to_path_buf()).with_admin_key(Some("sensei".to_string()));
        if let Err(err) = api.import_roster(&[RosterEntry {
            id: "ARA001".to_string(),
            name: "Jamie Park".to_string(),
            birth_date: "2012-04-09".to_string(),
            phone: None,
            current_belt: Some("Yellow Belt".to_string()),
        }]) {
            panic!("failed to seed roster: {err}");
        }
        app(ServiceState { api })
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, payload: &serde_json::Value) -> Request<Body> {
        let mut builder =
            Request::builder().uri(uri).method(method).header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
            .body(Body::from(payload.to_string()))
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri).method("GET");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    async fn login_token(router: &Router) -> String {
        let payload = serde_json::json!({
            "studentId": "ARA001",
            "birthDate": "2012-04-09",
            "action": "login",
            "actor": "student"
        });
        let response = send(router, json_request("POST", "/portal/login-event", None, &payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        value
            .get("token")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_else(|| panic!("missing token in login response: {value}"))
            .to_string()
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(ServiceState { api: PortalApi::new(unique_temp_db_path()) });
        let response = send(&router, get_request("/v1/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn login_profile_and_progress_round_trip() {
        let db_path = unique_temp_db_path();
        let router = seeded_router(&db_path);
        let token = login_token(&router).await;

        let profile = send(&router, get_request("/portal/profile", Some(&token))).await;
        assert_eq!(profile.status(), StatusCode::OK);
        let profile_value = response_json(profile).await;
        assert_eq!(
            profile_value.pointer("/student/currentBelt").and_then(serde_json::Value::as_str),
            Some("Yellow Belt")
        );

        let empty = send(&router, get_request("/portal/progress/ARA001", Some(&token))).await;
        assert_eq!(empty.status(), StatusCode::NOT_FOUND);

        let record = serde_json::json!({
            "studentId": "ARA001",
            "beltSlug": "HIGH-YELLOW",
            "fileName": "high-yellow.jpg",
            "uploadedAt": "2026-09-01T10:00:00Z"
        });
        let written = send(&router, json_request("POST", "/portal/progress", Some(&token), &record)).await;
        assert_eq!(written.status(), StatusCode::OK);
        let written_value = response_json(written).await;
        assert_eq!(written_value.get("beltSlug").and_then(serde_json::Value::as_str), Some("high-yellow"));

        let listed = send(&router, get_request("/portal/progress/ARA001", Some(&token))).await;
        assert_eq!(listed.status(), StatusCode::OK);
        let listed_value = response_json(listed).await;
        assert_eq!(
            listed_value.pointer("/records/0/fileName").and_then(serde_json::Value::as_str),
            Some("high-yellow.jpg")
        );

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn auth_failures_map_to_status_codes() {
        let db_path = unique_temp_db_path();
        let router = seeded_router(&db_path);

        let bad_login = serde_json::json!({"studentId": "ARA001", "birthDate": "1990-01-01"});
        let rejected = send(&router, json_request("POST", "/portal/login-event", None, &bad_login)).await;
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        let rejected_value = response_json(rejected).await;
        assert_eq!(
            rejected_value.get("error").and_then(serde_json::Value::as_str),
            Some("Invalid student ID or birth date")
        );

        let anonymous = send(&router, get_request("/portal/profile", None)).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let token = login_token(&router).await;
        let foreign = serde_json::json!({"studentId": "ARA999", "beltSlug": "red"});
        let forbidden = send(&router, json_request("POST", "/portal/progress", Some(&token), &foreign)).await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn admin_activity_accepts_header_or_query_key() {
        let db_path = unique_temp_db_path();
        let router = seeded_router(&db_path);
        login_token(&router).await;

        let missing = send(&router, get_request("/portal/admin/activity", None)).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let via_query = send(&router, get_request("/portal/admin/activity?adminKey=sensei&limit=5", None)).await;
        assert_eq!(via_query.status(), StatusCode::OK);
        let value = response_json(via_query).await;
        assert_eq!(value.pointer("/events/0/action").and_then(serde_json::Value::as_str), Some("login"));
        assert_eq!(value.pointer("/summary/0/loginEvents").and_then(serde_json::Value::as_i64), Some(1));

        let via_header = Request::builder()
            .uri("/portal/admin/activity")
            .method("GET")
            .header(ADMIN_KEY_HEADER, "sensei")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        assert_eq!(send(&router, via_header).await.status(), StatusCode::OK);

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn test_application_requires_complete_form() {
        let db_path = unique_temp_db_path();
        let router = seeded_router(&db_path);
        let token = login_token(&router).await;

        let incomplete = serde_json::json!({
            "studentName": "Jamie Park",
            "studentId": "ARA001",
            "currentBelt": "Yellow Belt",
            "desiredBelt": "High Yellow Belt",
            "preferredTestDate": ""
        });
        let rejected =
            send(&router, json_request("POST", "/portal/test-applications", Some(&token), &incomplete)).await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let complete = serde_json::json!({
            "studentName": "Jamie Park",
            "studentId": "ARA001",
            "currentBelt": "Yellow Belt",
            "desiredBelt": "High Yellow Belt",
            "preferredTestDate": "2026-11-14"
        });
        let accepted =
            send(&router, json_request("POST", "/portal/test-applications", Some(&token), &complete)).await;
        assert_eq!(accepted.status(), StatusCode::OK);
        let value = response_json(accepted).await;
        assert_eq!(value.get("ok").and_then(serde_json::Value::as_bool), Some(true));

        let _ = std::fs::remove_file(&db_path);
    }
}
