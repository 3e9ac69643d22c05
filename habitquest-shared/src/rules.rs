use crate::domain::RedemptionStatus;

/// A request that is well-formed but not allowed by the habit or reward rules
/// at this moment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleViolation {
    #[error("habit is not scheduled today")]
    NotScheduledToday,
    #[error("habit is cooling down, try again in {remaining_minutes} min")]
    CooldownActive { remaining_minutes: i64 },
    #[error("maximum completions reached for today")]
    MaxCompletionsReached,
    #[error("step already completed today")]
    AlreadyCompleted,
    #[error("step is not completed today")]
    NotCompleted,
    #[error("completed steps cannot be undone")]
    StepUncompleteDisabled,
    #[error("not enough coins, {shortfall} more needed")]
    InsufficientCoins { shortfall: i32 },
    #[error("redemption is already {status}")]
    RedemptionClosed { status: RedemptionStatus },
    #[error("habit is inactive")]
    HabitInactive,
    #[error("reward is inactive")]
    RewardInactive,
}

impl RuleViolation {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleViolation::NotScheduledToday => "not_scheduled_today",
            RuleViolation::CooldownActive { .. } => "cooldown_active",
            RuleViolation::MaxCompletionsReached => "max_completions_reached",
            RuleViolation::AlreadyCompleted => "already_completed",
            RuleViolation::NotCompleted => "not_completed",
            RuleViolation::StepUncompleteDisabled => "step_uncomplete_disabled",
            RuleViolation::InsufficientCoins { .. } => "insufficient_coins",
            RuleViolation::RedemptionClosed { .. } => "redemption_closed",
            RuleViolation::HabitInactive => "habit_inactive",
            RuleViolation::RewardInactive => "reward_inactive",
        }
    }
}
