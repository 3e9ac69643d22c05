use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Frequency, RedemptionStatus};
use crate::eligibility::Eligibility;

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParentModeReq {
    pub pin: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionDto {
    pub version: String,
}

// Profile
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileDto {
    pub id: String,
    pub email: String,
    pub name: String,
    pub timezone: String,
    pub has_pin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PinReq {
    pub pin: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimezoneReq {
    pub timezone: String,
}

// Children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildDto {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub avatar_url: Option<String>,
    pub coin_balance: i32,
    pub current_streak: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildReq {
    pub name: String,
    pub age: i32,
    pub avatar_url: Option<String>,
}

/// Administrative correction of a child's balance.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceReq {
    pub coin_balance: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildSessionResp {
    pub token: String,
    pub child_id: String,
}

// Habits
#[derive(Debug, Serialize, Deserialize)]
pub struct HabitReq {
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub frequency: Frequency,
    pub times_per_period: i32,
    #[serde(default)]
    pub cooldown_minutes: i32,
    pub coins_per_completion: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Step names in order; replaces all existing steps on update.
    #[serde(default)]
    pub steps: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitStepDto {
    pub id: String,
    pub name: String,
    pub order_index: i32,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitTodayDto {
    pub scheduled: bool,
    pub completions_today: i32,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub can_complete: bool,
    pub next_available_at: Option<DateTime<Utc>>,
    pub blocked_by: Option<String>,
}

impl From<&Eligibility> for HabitTodayDto {
    fn from(e: &Eligibility) -> Self {
        HabitTodayDto {
            scheduled: e.scheduled_today,
            completions_today: e.completions_today,
            last_completed_at: e.last_completed_at,
            can_complete: e.can_complete,
            next_available_at: e.next_available_at,
            blocked_by: e.blocked_by.as_ref().map(|v| v.kind().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitDto {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub frequency: Frequency,
    pub times_per_period: i32,
    pub cooldown_minutes: i32,
    pub coins_per_completion: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<HabitStepDto>,
    pub today: HabitTodayDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionResp {
    pub coins_awarded: i32,
    pub coin_balance: i32,
    pub current_streak: i32,
    pub habit_completed: bool,
}

// Rewards
#[derive(Debug, Serialize, Deserialize)]
pub struct RewardReq {
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub coin_cost: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Offer the reward to every child of the parent instead of this one only.
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardDto {
    pub id: String,
    pub child_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub coin_cost: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionDto {
    pub id: String,
    pub child_id: String,
    pub reward_id: String,
    pub status: RedemptionStatus,
    /// Cost paid at redemption time; refunds use this value.
    pub coin_cost: i32,
    pub redeemed_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reward_name: String,
    pub reward_icon: String,
    pub reward_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResp {
    pub redemption: RedemptionDto,
    pub coin_balance: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResp {
    pub redemption: RedemptionDto,
    pub coin_balance: i32,
}

/// Events pushed to a child's live sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RedemptionUpdated {
        child_id: String,
        redemption: RedemptionDto,
    },
    BalanceChanged {
        child_id: String,
        coin_balance: i32,
    },
}

impl ServerEvent {
    pub fn child_id(&self) -> &str {
        match self {
            ServerEvent::RedemptionUpdated { child_id, .. }
            | ServerEvent::BalanceChanged { child_id, .. } => child_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RedemptionUpdated { .. } => "redemption_updated",
            ServerEvent::BalanceChanged { .. } => "balance_changed",
        }
    }
}
