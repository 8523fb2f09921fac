pub mod api;
mod config;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
pub use config::{AppConfig, ConfigError, TutorConfig};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info_span;
use uuid::Uuid;

use crate::linkcode::{LinkError, LinkService, ROLE_CHILD, ROLE_TUTOR};
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub links: LinkService,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store, links: LinkService) -> Self {
        Self {
            config,
            store,
            links,
        }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/linkcodes/generate", post(api_generate))
        .route("/api/linkcodes/redeem", post(api_redeem))
        .route("/api/tutors/{id}/children", get(api_tutor_children))
        .route("/api/children/{id}/devices", get(api_child_devices))
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    // Put into request extensions for trace layer & handlers
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn api_generate(
    State(state): State<AppState>,
    Json(body): Json<api::GenerateReq>,
) -> Result<Json<api::GenerateResp>, AppError> {
    let generated = state.links.generate(body.tutor_id).await?;
    Ok(Json(api::GenerateResp {
        message: "link code generated".into(),
        code: generated.code,
        expires_at: generated.expires_at.to_rfc3339(),
    }))
}

async fn api_redeem(
    State(state): State<AppState>,
    Json(body): Json<api::RedeemReq>,
) -> Result<Json<api::RedeemResp>, AppError> {
    let redeemed = state.links.redeem(&body.code, body.device_info).await?;
    Ok(Json(api::RedeemResp {
        message: "code redeemed; child account and device linked".into(),
        tutor_id: redeemed.tutor_id,
        child_id: redeemed.child_id,
    }))
}

async fn api_tutor_children(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::ChildDto>>, AppError> {
    match state
        .store
        .find_user_by_id(id)
        .await
        .map_err(AppError::internal)?
    {
        Some(u) if u.role == ROLE_TUTOR => {}
        _ => return Err(AppError::not_found(format!("tutor not found: {}", id))),
    }
    let rows = state
        .store
        .list_children_of_tutor(id)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(|u| api::ChildDto {
            id: u.id,
            name: u.name,
            email: u.email,
        })
        .collect();
    Ok(Json(items))
}

async fn api_child_devices(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::DeviceDto>>, AppError> {
    match state
        .store
        .find_user_by_id(id)
        .await
        .map_err(AppError::internal)?
    {
        Some(u) if u.role == ROLE_CHILD => {}
        _ => return Err(AppError::not_found(format!("child not found: {}", id))),
    }
    let rows = state
        .store
        .list_devices_for_user(id)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(|d| api::DeviceDto {
            id: d.id,
            uuid: d.uuid,
            name: d.name,
            model: d.model,
            os_version: d.os_version,
            last_sync: chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(
                d.last_sync,
                chrono::Utc,
            )
            .to_rfc3339(),
        })
        .collect();
    Ok(Json(items))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

#[derive(Debug)]
pub enum AppError {
    Link(LinkError),
    NotFound(String),
    Internal(String),
}

impl AppError {
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<LinkError> for AppError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::Link(e) => {
                let status = match &e {
                    LinkError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    LinkError::NotAuthorized => StatusCode::FORBIDDEN,
                    LinkError::NotFound => StatusCode::NOT_FOUND,
                    LinkError::AlreadyUsed | LinkError::Conflict(_) => StatusCode::CONFLICT,
                    LinkError::Expired => StatusCode::GONE,
                    LinkError::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
                    LinkError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                // Do not leak storage error details to clients, but log them
                if let LinkError::Storage(inner) = &e {
                    (
                        status,
                        "internal server error".to_string(),
                        e.kind(),
                        Some(inner.to_string()),
                    )
                } else {
                    (status, e.to_string(), e.kind(), None)
                }
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        // Log any error responses at ERROR level for troubleshooting
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg, kind });
        (status, body).into_response()
    }
}
