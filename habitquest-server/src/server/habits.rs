use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use habitquest_shared::api::{self, ServerEvent};
use habitquest_shared::domain::{Frequency, HabitRules, StepId};
use habitquest_shared::rules::RuleViolation;
use serde::Deserialize;

use super::auth::AuthCtx;
use super::{AppError, AppState, ListOpts};
use crate::storage::{CompletionOutcome, HabitDraft, HabitState};

#[derive(Deserialize)]
pub(super) struct HabitPath {
    id: String,
    habit_id: String,
}

#[derive(Deserialize)]
pub(super) struct StepPath {
    id: String,
    habit_id: String,
    step_id: String,
}

fn habit_dto(state: HabitState) -> Result<api::HabitDto, AppError> {
    let HabitState {
        row,
        steps,
        eligibility,
    } = state;
    let frequency = Frequency::from_columns(&row.frequency, row.allowed_days.as_deref())
        .map_err(AppError::internal)?;
    let steps = steps
        .into_iter()
        .map(|s| api::HabitStepDto {
            completed: eligibility
                .completed_steps
                .contains(&StepId::from(s.id.as_str())),
            id: s.id,
            name: s.name,
            order_index: s.order_index,
        })
        .collect();
    Ok(api::HabitDto {
        today: api::HabitTodayDto::from(&eligibility),
        id: row.id,
        child_id: row.child_id,
        name: row.name,
        description: row.description,
        icon: row.icon,
        frequency,
        times_per_period: row.times_per_period,
        cooldown_minutes: row.cooldown_minutes,
        coins_per_completion: row.coins_per_completion,
        is_active: row.is_active,
        created_at: row.created_at.and_utc(),
        steps,
    })
}

fn draft(body: api::HabitReq) -> HabitDraft {
    HabitDraft {
        name: body.name,
        description: body.description.filter(|d| !d.trim().is_empty()),
        icon: body.icon,
        rules: HabitRules {
            frequency: body.frequency,
            times_per_period: body.times_per_period,
            cooldown_minutes: body.cooldown_minutes,
            coins_per_completion: body.coins_per_completion,
        },
        is_active: body.is_active,
        steps: body.steps,
    }
}

fn completion_resp(
    state: &AppState,
    child_id: &str,
    outcome: CompletionOutcome,
) -> api::CompletionResp {
    if outcome.coins_awarded != 0 {
        state.events.publish(ServerEvent::BalanceChanged {
            child_id: child_id.to_string(),
            coin_balance: outcome.coin_balance,
        });
    }
    api::CompletionResp {
        coins_awarded: outcome.coins_awarded,
        coin_balance: outcome.coin_balance,
        current_streak: outcome.current_streak,
        habit_completed: outcome.habit_completed,
    }
}

pub(super) async fn api_list_habits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Query(opts): Query<ListOpts>,
) -> Result<Json<Vec<api::HabitDto>>, AppError> {
    let rows = state
        .store
        .habit_board(&id, opts.active_only_for(&auth), Utc::now())
        .await?;
    let items = rows
        .into_iter()
        .map(habit_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

pub(super) async fn api_create_habit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<api::HabitReq>,
) -> Result<(StatusCode, Json<api::HabitDto>), AppError> {
    let habit_id = state.store.create_habit(&id, draft(body)).await?;
    let created = state.store.habit_state(&id, &habit_id, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(habit_dto(created)?)))
}

pub(super) async fn api_update_habit(
    State(state): State<AppState>,
    Path(p): Path<HabitPath>,
    Json(body): Json<api::HabitReq>,
) -> Result<Json<api::HabitDto>, AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    state
        .store
        .update_habit(&p.id, &p.habit_id, draft(body))
        .await?;
    let updated = state
        .store
        .habit_state(&p.id, &p.habit_id, Utc::now())
        .await?;
    Ok(Json(habit_dto(updated)?))
}

pub(super) async fn api_delete_habit(
    State(state): State<AppState>,
    Path(p): Path<HabitPath>,
) -> Result<StatusCode, AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    if state.store.delete_habit(&p.id, &p.habit_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("habit not found: {}", p.habit_id)))
    }
}

pub(super) async fn api_complete_habit(
    State(state): State<AppState>,
    Path(p): Path<HabitPath>,
) -> Result<Json<api::CompletionResp>, AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    let outcome = state
        .store
        .complete_habit(&p.id, &p.habit_id, Utc::now())
        .await?;
    Ok(Json(completion_resp(&state, &p.id, outcome)))
}

pub(super) async fn api_complete_step(
    State(state): State<AppState>,
    Path(p): Path<StepPath>,
) -> Result<Json<api::CompletionResp>, AppError> {
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    let outcome = state
        .store
        .complete_step(&p.id, &p.habit_id, &p.step_id, Utc::now())
        .await?;
    Ok(Json(completion_resp(&state, &p.id, outcome)))
}

pub(super) async fn api_uncomplete_step(
    State(state): State<AppState>,
    Path(p): Path<StepPath>,
) -> Result<Json<api::CompletionResp>, AppError> {
    if !state.config.allow_step_uncomplete {
        return Err(RuleViolation::StepUncompleteDisabled.into());
    }
    let child_mutex = state.child_mutex(&p.id).await;
    let _guard = child_mutex.lock().await;
    let outcome = state
        .store
        .uncomplete_step(&p.id, &p.habit_id, &p.step_id, Utc::now())
        .await?;
    Ok(Json(completion_resp(&state, &p.id, outcome)))
}
