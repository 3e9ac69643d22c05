use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use habitquest_shared::api::{self, ServerEvent};
use habitquest_shared::domain::{Decision, RedemptionStatus};
use serde::Deserialize;

use super::auth::AuthCtx;
use super::{AppError, AppState, ListOpts};
use crate::storage::models::RewardRow;
use crate::storage::{RedemptionWithReward, RewardDraft};

#[derive(Deserialize)]
pub(super) struct RedemptionFilter {
    status: Option<RedemptionStatus>,
}

#[derive(Deserialize)]
pub(super) struct RewardPath {
    id: String,
    reward_id: String,
}

#[derive(Deserialize)]
pub(super) struct RedemptionPath {
    id: String,
    redemption_id: String,
}

fn reward_dto(r: RewardRow) -> api::RewardDto {
    api::RewardDto {
        id: r.id,
        child_id: r.child_id,
        name: r.name,
        description: r.description,
        icon: r.icon,
        coin_cost: r.coin_cost,
        is_active: r.is_active,
        created_at: r.created_at.and_utc(),
    }
}

fn redemption_dto(r: &RedemptionWithReward) -> Result<api::RedemptionDto, AppError> {
    let status = r
        .redemption
        .status
        .parse::<RedemptionStatus>()
        .map_err(AppError::internal)?;
    Ok(api::RedemptionDto {
        id: r.redemption.id.clone(),
        child_id: r.redemption.child_id.clone(),
        reward_id: r.redemption.reward_id.clone(),
        status,
        coin_cost: r.redemption.coin_cost,
        redeemed_at: r.redemption.redeemed_at.and_utc(),
        decided_at: r.redemption.decided_at.map(|d| d.and_utc()),
        reward_name: r.reward.name.clone(),
        reward_icon: r.reward.icon.clone(),
        reward_description: r.reward.description.clone(),
    })
}

fn draft(body: api::RewardReq) -> RewardDraft {
    RewardDraft {
        name: body.name,
        description: body.description.filter(|d| !d.trim().is_empty()),
        icon: body.icon,
        coin_cost: body.coin_cost,
        is_active: body.is_active,
        shared: body.shared,
    }
}

/// One event per redemption transition, plus the balance when it moved.
fn announce(state: &AppState, child_id: &str, dto: &api::RedemptionDto, balance: Option<i32>) {
    state.events.publish(ServerEvent::RedemptionUpdated {
        child_id: child_id.to_string(),
        redemption: dto.clone(),
    });
    if let Some(coin_balance) = balance {
        state.events.publish(ServerEvent::BalanceChanged {
            child_id: child_id.to_string(),
            coin_balance,
        });
    }
}

pub(super) async fn api_list_rewards(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Query(opts): Query<ListOpts>,
) -> Result<Json<Vec<api::RewardDto>>, AppError> {
    let rows = state
        .store
        .list_rewards(&id, opts.active_only_for(&auth))
        .await?;
    Ok(Json(rows.into_iter().map(reward_dto).collect()))
}

pub(super) async fn api_create_reward(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<api::RewardReq>,
) -> Result<(StatusCode, Json<api::RewardDto>), AppError> {
    let created = state.store.create_reward(&id, draft(body)).await?;
    Ok((StatusCode::CREATED, Json(reward_dto(created))))
}

pub(super) async fn api_update_reward(
    State(state): State<AppState>,
    Path(p): Path<RewardPath>,
    Json(body): Json<api::RewardReq>,
) -> Result<Json<api::RewardDto>, AppError> {
    let updated = state
        .store
        .update_reward(&p.id, &p.reward_id, draft(body))
        .await?;
    Ok(Json(reward_dto(updated)))
}

pub(super) async fn api_delete_reward(
    State(state): State<AppState>,
    Path(p): Path<RewardPath>,
) -> Result<StatusCode, AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    if state.store.delete_reward(&p.id, &p.reward_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("reward not found: {}", p.reward_id)))
    }
}

pub(super) async fn api_redeem(
    State(state): State<AppState>,
    Path(p): Path<RewardPath>,
) -> Result<(StatusCode, Json<api::RedeemResp>), AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    let result = state.store.redeem(&p.id, &p.reward_id, Utc::now()).await?;
    let dto = redemption_dto(&result)?;
    announce(&state, &p.id, &dto, Some(result.coin_balance));
    Ok((
        StatusCode::CREATED,
        Json(api::RedeemResp {
            redemption: dto,
            coin_balance: result.coin_balance,
        }),
    ))
}

pub(super) async fn api_list_redemptions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(filter): Query<RedemptionFilter>,
) -> Result<Json<Vec<api::RedemptionDto>>, AppError> {
    let rows = state.store.list_redemptions(&id, filter.status).await?;
    let items = rows
        .iter()
        .map(redemption_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

async fn decide(
    state: &AppState,
    p: &RedemptionPath,
    decision: Decision,
) -> Result<Json<api::DecisionResp>, AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    let result = state
        .store
        .decide_redemption(&p.id, &p.redemption_id, decision, Utc::now())
        .await?;
    let dto = redemption_dto(&result)?;
    let refunded = (decision == Decision::Deny).then_some(result.coin_balance);
    announce(state, &p.id, &dto, refunded);
    Ok(Json(api::DecisionResp {
        redemption: dto,
        coin_balance: result.coin_balance,
    }))
}

pub(super) async fn api_approve_redemption(
    State(state): State<AppState>,
    Path(p): Path<RedemptionPath>,
) -> Result<Json<api::DecisionResp>, AppError> {
    decide(&state, &p, Decision::Approve).await
}

pub(super) async fn api_deny_redemption(
    State(state): State<AppState>,
    Path(p): Path<RedemptionPath>,
) -> Result<Json<api::DecisionResp>, AppError> {
    decide(&state, &p, Decision::Deny).await
}
