use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::RuleViolation;

pub const CHILD_AGE_RANGE: RangeInclusive<i32> = 6..=12;
pub const TIMES_PER_PERIOD_RANGE: RangeInclusive<i32> = 1..=5;
pub const COINS_PER_COMPLETION_RANGE: RangeInclusive<i32> = 1..=1000;
pub const COOLDOWN_MINUTES_RANGE: RangeInclusive<i32> = 0..=1440;
pub const COIN_COST_RANGE: RangeInclusive<i32> = 1..=10000;
pub const MIN_PIN_LEN: usize = 4;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(ChildId);
string_id!(HabitId);
string_id!(StepId);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown weekday code: {0}")]
    UnknownWeekday(String),
    #[error("unknown frequency: {0}")]
    UnknownFrequency(String),
    #[error("unknown redemption status: {0}")]
    UnknownStatus(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl DomainError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DomainError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        use chrono::Datelike;
        date.weekday().into()
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(value: chrono::Weekday) -> Self {
        match value {
            chrono::Weekday::Mon => Weekday::Mon,
            chrono::Weekday::Tue => Weekday::Tue,
            chrono::Weekday::Wed => Weekday::Wed,
            chrono::Weekday::Thu => Weekday::Thu,
            chrono::Weekday::Fri => Weekday::Fri,
            chrono::Weekday::Sat => Weekday::Sat,
            chrono::Weekday::Sun => Weekday::Sun,
        }
    }
}

impl FromStr for Weekday {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Weekday::ALL
            .into_iter()
            .find(|d| d.code() == s.trim())
            .ok_or_else(|| DomainError::UnknownWeekday(s.to_string()))
    }
}

/// Recurrence pattern of a habit.
///
/// `Custom` restricts the habit to a set of weekdays. An empty set is accepted when
/// reading stored rows but is never scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "allowed_days", rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Custom(BTreeSet<Weekday>),
}

impl Frequency {
    pub fn name(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Custom(_) => "custom",
        }
    }

    /// Storage form: `(frequency, allowed_days)` where allowed days are a comma list.
    pub fn to_columns(&self) -> (&'static str, Option<String>) {
        match self {
            Frequency::Custom(days) => (
                self.name(),
                Some(
                    days.iter()
                        .map(|d| d.code())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            ),
            _ => (self.name(), None),
        }
    }

    pub fn from_columns(frequency: &str, allowed_days: Option<&str>) -> Result<Self, DomainError> {
        match frequency {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "custom" => {
                let days = allowed_days
                    .unwrap_or_default()
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(Weekday::from_str)
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(Frequency::Custom(days))
            }
            other => Err(DomainError::UnknownFrequency(other.to_string())),
        }
    }
}

/// Completion rules shared by both habit shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitRules {
    pub frequency: Frequency,
    pub times_per_period: i32,
    pub cooldown_minutes: i32,
    pub coins_per_completion: i32,
}

impl HabitRules {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !TIMES_PER_PERIOD_RANGE.contains(&self.times_per_period) {
            return Err(DomainError::invalid(
                "times_per_period",
                format!("must be within {:?}", TIMES_PER_PERIOD_RANGE),
            ));
        }
        if !COINS_PER_COMPLETION_RANGE.contains(&self.coins_per_completion) {
            return Err(DomainError::invalid(
                "coins_per_completion",
                format!("must be within {:?}", COINS_PER_COMPLETION_RANGE),
            ));
        }
        if !COOLDOWN_MINUTES_RANGE.contains(&self.cooldown_minutes) {
            return Err(DomainError::invalid(
                "cooldown_minutes",
                format!("must be within {:?}", COOLDOWN_MINUTES_RANGE),
            ));
        }
        if let Frequency::Custom(days) = &self.frequency
            && days.is_empty()
        {
            return Err(DomainError::invalid(
                "allowed_days",
                "custom frequency needs at least one day",
            ));
        }
        Ok(())
    }

    /// Cooldown as it is persisted: zero unless the habit allows several completions.
    pub fn effective_cooldown(&self) -> i32 {
        if self.times_per_period > 1 {
            self.cooldown_minutes
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitStep {
    pub id: StepId,
    pub name: String,
    pub order_index: i32,
}

/// A habit is either completed as a whole or through an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HabitShape {
    Stepless,
    Stepped(Vec<HabitStep>),
}

impl HabitShape {
    pub fn from_steps(mut steps: Vec<HabitStep>) -> Self {
        if steps.is_empty() {
            HabitShape::Stepless
        } else {
            steps.sort_by_key(|s| s.order_index);
            HabitShape::Stepped(steps)
        }
    }

    pub fn steps(&self) -> &[HabitStep] {
        match self {
            HabitShape::Stepless => &[],
            HabitShape::Stepped(steps) => steps,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Habit {
    pub id: HabitId,
    pub child_id: ChildId,
    pub name: String,
    pub rules: HabitRules,
    pub is_active: bool,
    pub shape: HabitShape,
}

impl Habit {
    pub fn has_step(&self, step: &StepId) -> bool {
        self.shape.steps().iter().any(|s| &s.id == step)
    }
}

/// One completion record as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub step_id: Option<StepId>,
    pub date: NaiveDate,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl RedemptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Approved => "approved",
            RedemptionStatus::Denied => "denied",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RedemptionStatus::Pending)
    }

    /// Only `pending` accepts a decision; both outcomes are final.
    pub fn transition(self, decision: Decision) -> Result<RedemptionStatus, RuleViolation> {
        match (self, decision) {
            (RedemptionStatus::Pending, Decision::Approve) => Ok(RedemptionStatus::Approved),
            (RedemptionStatus::Pending, Decision::Deny) => Ok(RedemptionStatus::Denied),
            (status, _) => Err(RuleViolation::RedemptionClosed { status }),
        }
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedemptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RedemptionStatus::Pending),
            "approved" => Ok(RedemptionStatus::Approved),
            "denied" => Ok(RedemptionStatus::Denied),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

pub fn validate_child_age(age: i32) -> Result<(), DomainError> {
    if CHILD_AGE_RANGE.contains(&age) {
        Ok(())
    } else {
        Err(DomainError::invalid(
            "age",
            format!("must be within {:?}", CHILD_AGE_RANGE),
        ))
    }
}

pub fn validate_coin_cost(cost: i32) -> Result<(), DomainError> {
    if COIN_COST_RANGE.contains(&cost) {
        Ok(())
    } else {
        Err(DomainError::invalid(
            "coin_cost",
            format!("must be within {:?}", COIN_COST_RANGE),
        ))
    }
}

pub fn validate_pin(pin: &str) -> Result<(), DomainError> {
    if pin.len() >= MIN_PIN_LEN && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(DomainError::invalid(
            "pin",
            format!("must be at least {MIN_PIN_LEN} digits"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_columns_round_trip_custom_days() {
        let freq = Frequency::Custom([Weekday::Sat, Weekday::Mon].into_iter().collect());
        let (name, days) = freq.to_columns();
        assert_eq!(name, "custom");
        assert_eq!(days.as_deref(), Some("mon,sat"));
        assert_eq!(Frequency::from_columns(name, days.as_deref()).unwrap(), freq);
    }

    #[test]
    fn unknown_weekday_code_is_rejected() {
        let err = Frequency::from_columns("custom", Some("mon,funday")).unwrap_err();
        assert_eq!(err, DomainError::UnknownWeekday("funday".into()));
    }

    #[test]
    fn custom_without_days_fails_validation() {
        let rules = HabitRules {
            frequency: Frequency::Custom(BTreeSet::new()),
            times_per_period: 1,
            cooldown_minutes: 0,
            coins_per_completion: 5,
        };
        assert!(rules.validate().is_err());
    }

    #[test]
    fn cooldown_is_dropped_for_single_completion_habits() {
        let mut rules = HabitRules {
            frequency: Frequency::Daily,
            times_per_period: 1,
            cooldown_minutes: 60,
            coins_per_completion: 5,
        };
        assert_eq!(rules.effective_cooldown(), 0);
        rules.times_per_period = 2;
        assert_eq!(rules.effective_cooldown(), 60);
    }

    #[test]
    fn terminal_redemptions_reject_further_decisions() {
        let approved = RedemptionStatus::Pending
            .transition(Decision::Approve)
            .unwrap();
        assert_eq!(approved, RedemptionStatus::Approved);
        assert!(approved.transition(Decision::Deny).is_err());
        let denied = RedemptionStatus::Pending.transition(Decision::Deny).unwrap();
        assert!(denied.is_terminal());
        assert!(denied.transition(Decision::Approve).is_err());
    }

    #[test]
    fn frequency_serializes_as_tagged_object() {
        let freq = Frequency::Custom([Weekday::Tue].into_iter().collect());
        let v = serde_json::to_value(&freq).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "custom", "allowed_days": ["tue"]}));
        let daily: Frequency = serde_json::from_value(serde_json::json!({"kind": "daily"})).unwrap();
        assert_eq!(daily, Frequency::Daily);
    }
}
