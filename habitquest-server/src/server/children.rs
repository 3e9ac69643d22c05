use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use habitquest_shared::api::{self, ServerEvent};
use habitquest_shared::auth::Role;

use super::auth::{self, AuthCtx};
use super::{AppError, AppState};
use crate::storage::{ledger::visible_streak, models::Child};

pub(super) fn child_dto(c: Child, today: NaiveDate) -> api::ChildDto {
    api::ChildDto {
        current_streak: visible_streak(c.current_streak, c.last_active_date, today),
        id: c.id,
        name: c.name,
        age: c.age,
        avatar_url: c.avatar_url,
        coin_balance: c.coin_balance,
        created_at: c.created_at.and_utc(),
    }
}

pub(super) async fn api_list_children(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::ChildDto>>, AppError> {
    let today = state.parent_today(&auth.claims.sub).await?;
    let rows = state.store.list_children(&auth.claims.sub).await?;
    Ok(Json(rows.into_iter().map(|c| child_dto(c, today)).collect()))
}

pub(super) async fn api_get_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<api::ChildDto>, AppError> {
    let today = state.parent_today(&auth.claims.sub).await?;
    let child = state
        .store
        .get_child(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("child not found: {id}")))?;
    Ok(Json(child_dto(child, today)))
}

pub(super) async fn api_create_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::ChildReq>,
) -> Result<(StatusCode, Json<api::ChildDto>), AppError> {
    let today = state.parent_today(&auth.claims.sub).await?;
    let child = state
        .store
        .create_child(
            &auth.claims.sub,
            &body.name,
            body.age,
            body.avatar_url.as_deref(),
        )
        .await?;
    tracing::info!(child_id = %child.id, "child created");
    Ok((StatusCode::CREATED, Json(child_dto(child, today))))
}

pub(super) async fn api_update_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<api::ChildReq>,
) -> Result<Json<api::ChildDto>, AppError> {
    let today = state.parent_today(&auth.claims.sub).await?;
    let child = state
        .store
        .update_child(&id, &body.name, body.age, body.avatar_url.as_deref())
        .await?;
    Ok(Json(child_dto(child, today)))
}

pub(super) async fn api_delete_child(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let child_mutex = state.child_mutex(&id).await;
    let guard = child_mutex.lock().await;
    if state.store.delete_child(&id).await? {
        drop(guard);
        state.forget_child(&id).await;
        tracing::info!(child_id = %id, "child deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("child not found: {id}")))
    }
}

pub(super) async fn api_correct_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<api::BalanceReq>,
) -> Result<Json<api::ChildDto>, AppError> {
    let child_mutex = state.child_mutex(&id).await;
    let _guard = child_mutex.lock().await;
    let balance = state.store.set_balance(&id, body.coin_balance).await?;
    state.events.publish(ServerEvent::BalanceChanged {
        child_id: id.clone(),
        coin_balance: balance,
    });
    let today = state.parent_today(&auth.claims.sub).await?;
    let child = state
        .store
        .get_child(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("child not found: {id}")))?;
    Ok(Json(child_dto(child, today)))
}

/// Switches a device into child mode for one child.
pub(super) async fn api_child_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<api::ChildSessionResp>, AppError> {
    let token = auth::issue_jwt(&state, &auth.claims.sub, Role::Child, Some(id.clone())).await?;
    tracing::info!(child_id = %id, "child mode session issued");
    Ok(Json(api::ChildSessionResp {
        token,
        child_id: id,
    }))
}
