mod acl;
pub mod auth;
mod children;
mod config;
pub mod events;
mod habits;
mod rewards;

use crate::server::auth::AuthCtx;
use crate::storage::{Store, StorageError};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, State},
    http::{Method, StatusCode, header},
    routing::{get, post, put},
};
use bcrypt::verify;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
pub use config::{AppConfig, ConfigError, ParentConfig};
use habitquest_shared::api;
use habitquest_shared::auth::Role;
use habitquest_shared::domain::{RedemptionStatus, validate_pin};
use habitquest_shared::rules::RuleViolation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

type ChildLockMap = Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub events: events::Notifier,
    // One lock per child so a child's writes apply in arrival order
    child_locks: ChildLockMap,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config,
            store,
            events: events::Notifier::new(64),
            child_locks: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn child_mutex(&self, child_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.child_locks.lock().await;
        map.entry(child_id.to_string())
            .or_insert_with(Default::default)
            .clone()
    }

    async fn forget_child(&self, child_id: &str) {
        self.child_locks.lock().await.remove(child_id);
    }

    /// Calendar day in the parent's timezone.
    async fn parent_today(&self, parent_id: &str) -> Result<NaiveDate, AppError> {
        let tz = self
            .store
            .get_profile(parent_id)
            .await?
            .and_then(|p| p.timezone.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC);
        Ok(Utc::now().with_timezone(&tz).date_naive())
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

#[derive(Deserialize)]
struct ListOpts {
    #[serde(default)]
    active_only: bool,
}

impl ListOpts {
    /// Children only ever see what is currently offered to them.
    fn active_only_for(&self, auth: &AuthCtx) -> bool {
        self.active_only || auth.claims.role == Role::Child
    }
}

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/auth/parent-mode", post(api_parent_mode))
        .route("/api/v1/auth/logout", post(api_logout))
        .route("/api/v1/profile", get(api_profile))
        .route("/api/v1/profile/pin", put(api_set_pin))
        .route("/api/v1/profile/timezone", put(api_set_timezone))
        .route(
            "/api/v1/children",
            get(children::api_list_children).post(children::api_create_child),
        )
        .route(
            "/api/v1/children/{id}",
            get(children::api_get_child)
                .put(children::api_update_child)
                .delete(children::api_delete_child),
        )
        .route(
            "/api/v1/children/{id}/balance",
            put(children::api_correct_balance),
        )
        .route(
            "/api/v1/children/{id}/session",
            post(children::api_child_session),
        )
        .route("/api/v1/children/{id}/events", get(events::api_child_events))
        .route(
            "/api/v1/children/{id}/habits",
            get(habits::api_list_habits).post(habits::api_create_habit),
        )
        .route(
            "/api/v1/children/{id}/habits/{habit_id}",
            put(habits::api_update_habit).delete(habits::api_delete_habit),
        )
        .route(
            "/api/v1/children/{id}/habits/{habit_id}/complete",
            post(habits::api_complete_habit),
        )
        .route(
            "/api/v1/children/{id}/habits/{habit_id}/steps/{step_id}/complete",
            post(habits::api_complete_step),
        )
        .route(
            "/api/v1/children/{id}/habits/{habit_id}/steps/{step_id}/uncomplete",
            post(habits::api_uncomplete_step),
        )
        .route(
            "/api/v1/children/{id}/rewards",
            get(rewards::api_list_rewards).post(rewards::api_create_reward),
        )
        .route(
            "/api/v1/children/{id}/rewards/{reward_id}",
            put(rewards::api_update_reward).delete(rewards::api_delete_reward),
        )
        .route(
            "/api/v1/children/{id}/rewards/{reward_id}/redeem",
            post(rewards::api_redeem),
        )
        .route(
            "/api/v1/children/{id}/redemptions",
            get(rewards::api_list_redemptions),
        )
        .route(
            "/api/v1/children/{id}/redemptions/{redemption_id}/approve",
            post(rewards::api_approve_redemption),
        )
        .route(
            "/api/v1/children/{id}/redemptions/{redemption_id}/deny",
            post(rewards::api_deny_redemption),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            acl::enforce_acl,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(middleware::from_fn(set_auth_span_fields));

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
            profile_id = tracing::field::Empty,
            role = tracing::field::Empty,
            child_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/version", get(api_version))
        .route("/api/v1/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn api_version() -> Json<api::VersionDto> {
    Json(api::VersionDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
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
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    // API answers are per-user and time dependent
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("profile_id", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(cid) = &auth.claims.child_id {
            span.record("child_id", tracing::field::display(cid));
        }
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let parent = state
        .config
        .parents
        .iter()
        .find(|p| p.email.eq_ignore_ascii_case(body.email.trim()))
        .ok_or_else(|| {
            tracing::warn!(email=%body.email, "login: unknown email");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &parent.password_hash).map_err(|e| {
        tracing::error!(email=%body.email, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(email=%body.email, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let profile = state
        .store
        .get_profile_by_email(&parent.email)
        .await?
        .ok_or_else(|| {
            tracing::error!(email=%parent.email, "login: parent profile was not seeded");
            AppError::internal("profile missing")
        })?;
    let token = auth::issue_jwt(&state, &profile.id, Role::Parent, None).await?;
    Ok(Json(api::AuthResp { token }))
}

/// Leaves child mode. Requires the PIN of the parent who opened the child session.
async fn api_parent_mode(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::ParentModeReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let profile = state
        .store
        .get_profile(&auth.claims.sub)
        .await?
        .ok_or_else(AppError::unauthorized)?;
    let Some(pin_hash) = profile.pin_hash.as_deref() else {
        tracing::warn!(profile_id=%profile.id, "parent-mode: no PIN set");
        return Err(AppError::bad_request("no PIN set; log in with email and password"));
    };
    if !verify(&body.pin, pin_hash).map_err(AppError::internal)? {
        tracing::warn!(profile_id=%profile.id, "parent-mode: wrong PIN");
        return Err(AppError::unauthorized());
    }
    // The child-mode session ends here; its token must not outlive the switch
    state.store.delete_session(&auth.claims.jti).await?;
    let token = auth::issue_jwt(&state, &profile.id, Role::Parent, None).await?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<StatusCode, AppError> {
    state.store.delete_session(&auth.claims.jti).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn profile_dto(p: crate::storage::models::Profile) -> api::ProfileDto {
    api::ProfileDto {
        has_pin: p.pin_hash.is_some(),
        id: p.id,
        email: p.email,
        name: p.name,
        timezone: p.timezone,
    }
}

async fn api_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let profile = state
        .store
        .get_profile(&auth.claims.sub)
        .await?
        .ok_or_else(|| AppError::not_found("profile not found"))?;
    Ok(Json(profile_dto(profile)))
}

async fn api_set_pin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::PinReq>,
) -> Result<StatusCode, AppError> {
    validate_pin(&body.pin).map_err(|e| AppError::bad_request(e.to_string()))?;
    let pin = body.pin;
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(pin, bcrypt::DEFAULT_COST))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)?;
    state.store.set_pin_hash(&auth.claims.sub, &hash).await?;
    tracing::info!(profile_id=%auth.claims.sub, "parent PIN updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn api_set_timezone(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::TimezoneReq>,
) -> Result<Json<api::ProfileDto>, AppError> {
    state
        .store
        .set_timezone(&auth.claims.sub, body.timezone.trim())
        .await?;
    let profile = state
        .store
        .get_profile(&auth.claims.sub)
        .await?
        .ok_or_else(|| AppError::not_found("profile not found"))?;
    Ok(Json(profile_dto(profile)))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shortfall: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RedemptionStatus>,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    /// The request was understood but the habit or reward rules refuse it now.
    Conflict(RuleViolation),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => AppError::NotFound(e.to_string()),
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            StorageError::Domain(d) => AppError::BadRequest(d.to_string()),
            StorageError::Rule(v) => AppError::Conflict(v),
            other => AppError::internal(other),
        }
    }
}

impl From<RuleViolation> for AppError {
    fn from(v: RuleViolation) -> Self {
        AppError::Conflict(v)
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut body = ErrorBody {
            error: String::new(),
            kind: "",
            remaining_minutes: None,
            shortfall: None,
            status: None,
        };
        let (status, detail) = match self {
            AppError::BadRequest(m) => {
                body.error = m;
                body.kind = "bad_request";
                (StatusCode::BAD_REQUEST, None)
            }
            AppError::Unauthorized => {
                body.error = "unauthorized".into();
                body.kind = "unauthorized";
                (StatusCode::UNAUTHORIZED, None)
            }
            AppError::Forbidden => {
                body.error = "forbidden".into();
                body.kind = "forbidden";
                (StatusCode::FORBIDDEN, None)
            }
            AppError::NotFound(m) => {
                body.error = m;
                body.kind = "not_found";
                (StatusCode::NOT_FOUND, None)
            }
            AppError::Conflict(v) => {
                body.error = v.to_string();
                body.kind = v.kind();
                match v {
                    RuleViolation::CooldownActive { remaining_minutes } => {
                        body.remaining_minutes = Some(remaining_minutes)
                    }
                    RuleViolation::InsufficientCoins { shortfall } => {
                        body.shortfall = Some(shortfall)
                    }
                    RuleViolation::RedemptionClosed { status } => body.status = Some(status),
                    _ => {}
                }
                (StatusCode::CONFLICT, None)
            }
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => {
                body.error = "internal server error".into();
                body.kind = "internal";
                (StatusCode::INTERNAL_SERVER_ERROR, Some(m))
            }
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = body.kind, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = body.kind, message = %body.error, "request refused");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state(dir: &tempfile::TempDir) -> AppState {
        let db = dir.path().join("state.db");
        let store = Store::connect_sqlite(db.to_str().unwrap()).await.unwrap();
        let config = AppConfig {
            jwt_secret: "unit-test-secret-value".into(),
            parents: Vec::new(),
            default_timezone: "UTC".into(),
            allow_step_uncomplete: false,
            dev_cors_origin: None,
            listen_port: None,
        };
        AppState::new(config, store)
    }

    #[tokio::test]
    async fn forgetting_a_child_drops_its_lock() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let first = state.child_mutex("c1").await;
        let again = state.child_mutex("c1").await;
        assert!(Arc::ptr_eq(&first, &again));
        state.child_mutex("c2").await;

        state.forget_child("c1").await;
        let map = state.child_locks.lock().await;
        assert!(!map.contains_key("c1"));
        assert!(map.contains_key("c2"));
    }
}
