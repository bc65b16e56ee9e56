//! The HTTP surface: three JSON routes plus a health check, wrapped in a
//! panic-recovery / tracing / CORS middleware stack.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use calc_core::{OrchestratorError, usecase};
use calc_db::models::Calculation;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
    }

    fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::InvalidExpression(_)
            | OrchestratorError::InvalidUserId
            | OrchestratorError::TooManyOperations { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::CalculationNotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Unauthorized(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let public_code = match status {
            StatusCode::BAD_REQUEST => "INVALID_ARGUMENT",
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::FORBIDDEN => "PERMISSION_DENIED",
            _ => "INTERNAL",
        };
        Self::new(status, public_code, err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "code": self.code,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCalculationRequest {
    pub expression: String,
}

#[derive(Debug, Serialize)]
pub struct CreateCalculationResponse {
    pub id: Uuid,
    pub status: String,
    pub result: String,
    pub error_message: String,
}

impl From<Calculation> for CreateCalculationResponse {
    fn from(c: Calculation) -> Self {
        Self {
            id: c.id,
            status: c.status.to_string(),
            result: c.result,
            error_message: c.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CalculationResponse {
    #[serde(flatten)]
    pub calculation: Calculation,
}

#[derive(Debug, Serialize)]
pub struct ListCalculationsResponse {
    pub calculations: Vec<Calculation>,
}

// ---------------------------------------------------------------------------
// User-id extraction
// ---------------------------------------------------------------------------

/// Parse the caller's identity from the `x-user-id` header. Absent or
/// unparseable fails `UNAUTHENTICATED`.
fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get("x-user-id")
        .ok_or_else(|| AppError::unauthenticated("missing x-user-id header"))?
        .to_str()
        .map_err(|_| AppError::unauthenticated("x-user-id header is not valid UTF-8"))?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::unauthenticated("x-user-id header is not a valid UUID"))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/v1/calculations",
            post(create_calculation).get(list_calculations),
        )
        .route("/v1/calculations/{id}", get(get_calculation))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn create_calculation(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Json(req): Json<CreateCalculationRequest>,
) -> Result<Json<CreateCalculationResponse>, AppError> {
    let user_id = user_id_from_headers(&headers)?;
    if req.expression.trim().is_empty() {
        return Err(AppError::invalid_argument("expression must not be empty"));
    }

    let calc = usecase::calculate_expression(&pool, user_id, &req.expression).await?;
    Ok(Json(calc.into()))
}

async fn get_calculation(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CalculationResponse>, AppError> {
    let user_id = user_id_from_headers(&headers)?;
    let calc_id =
        Uuid::parse_str(&id).map_err(|_| AppError::invalid_argument("invalid calculation id"))?;

    let calculation = usecase::get_calculation(&pool, calc_id, user_id).await?;
    Ok(Json(CalculationResponse { calculation }))
}

async fn list_calculations(
    State(pool): State<PgPool>,
    headers: HeaderMap,
) -> Result<Json<ListCalculationsResponse>, AppError> {
    let user_id = user_id_from_headers(&headers)?;
    let calculations = usecase::list_calculations(&pool, user_id).await?;
    Ok(Json(ListCalculationsResponse { calculations }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use sqlx::PgPool;
    use tower::ServiceExt;

    use calc_test_utils::{create_test_db, drop_test_db};

    async fn send(
        pool: PgPool,
        method: &str,
        uri: &str,
        user_id: Option<uuid::Uuid>,
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        let app = super::build_router(pool);
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user_id {
            builder = builder.header("x-user-id", id.to_string());
        }
        builder = builder.header("content-type", "application/json");
        let body = match body {
            Some(json) => Body::from(serde_json::to_vec(&json).unwrap()),
            None => Body::empty(),
        };
        let req = builder.body(body).unwrap();
        app.oneshot(req).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (pool, db_name) = create_test_db().await;
        let resp = send(pool.clone(), "GET", "/healthz", None, None).await;
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn create_without_user_header_is_unauthenticated() {
        let (pool, db_name) = create_test_db().await;
        let resp = send(
            pool.clone(),
            "POST",
            "/v1/calculations",
            None,
            Some(serde_json::json!({ "expression": "1+2" })),
        )
        .await;
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn create_with_empty_expression_is_invalid_argument() {
        let (pool, db_name) = create_test_db().await;
        let user_id = uuid::Uuid::new_v4();
        let resp = send(
            pool.clone(),
            "POST",
            "/v1/calculations",
            Some(user_id),
            Some(serde_json::json!({ "expression": "" })),
        )
        .await;
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (pool, db_name) = create_test_db().await;
        let user_id = uuid::Uuid::new_v4();

        let create_resp = send(
            pool.clone(),
            "POST",
            "/v1/calculations",
            Some(user_id),
            Some(serde_json::json!({ "expression": "2+3" })),
        )
        .await;
        assert_eq!(create_resp.status(), axum::http::StatusCode::OK);
        let created = body_json(create_resp).await;
        let id = created["id"].as_str().unwrap();

        let get_resp = send(
            pool.clone(),
            "GET",
            &format!("/v1/calculations/{id}"),
            Some(user_id),
            None,
        )
        .await;
        assert_eq!(get_resp.status(), axum::http::StatusCode::OK);
        let fetched = body_json(get_resp).await;
        assert_eq!(fetched["id"], id);
        assert_eq!(fetched["expression"], "2+3");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_unknown_calculation_is_not_found() {
        let (pool, db_name) = create_test_db().await;
        let user_id = uuid::Uuid::new_v4();
        let random_id = uuid::Uuid::new_v4();

        let resp = send(
            pool.clone(),
            "GET",
            &format!("/v1/calculations/{random_id}"),
            Some(user_id),
            None,
        )
        .await;
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_another_users_calculation_is_forbidden() {
        let (pool, db_name) = create_test_db().await;
        let owner = uuid::Uuid::new_v4();
        let stranger = uuid::Uuid::new_v4();

        let create_resp = send(
            pool.clone(),
            "POST",
            "/v1/calculations",
            Some(owner),
            Some(serde_json::json!({ "expression": "4*5" })),
        )
        .await;
        let created = body_json(create_resp).await;
        let id = created["id"].as_str().unwrap();

        let resp = send(
            pool.clone(),
            "GET",
            &format!("/v1/calculations/{id}"),
            Some(stranger),
            None,
        )
        .await;
        assert_eq!(resp.status(), axum::http::StatusCode::FORBIDDEN);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn list_returns_only_callers_calculations() {
        let (pool, db_name) = create_test_db().await;
        let user_id = uuid::Uuid::new_v4();
        let other = uuid::Uuid::new_v4();

        send(
            pool.clone(),
            "POST",
            "/v1/calculations",
            Some(user_id),
            Some(serde_json::json!({ "expression": "1+1" })),
        )
        .await;
        send(
            pool.clone(),
            "POST",
            "/v1/calculations",
            Some(other),
            Some(serde_json::json!({ "expression": "9+9" })),
        )
        .await;

        let resp = send(pool.clone(), "GET", "/v1/calculations", Some(user_id), None).await;
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let json = body_json(resp).await;
        let list = json["calculations"].as_array().unwrap();
        assert_eq!(list.len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
