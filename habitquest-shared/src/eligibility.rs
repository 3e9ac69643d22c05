//! Decides whether a habit may be completed right now.
//!
//! The evaluation is a pure function of the habit, the completion records of one
//! calendar day, that day and the current instant. Callers re-run it on every
//! refresh; the store re-runs it inside the write transaction before inserting.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::domain::{Frequency, Habit, HabitShape, ProgressEntry, StepId};
use crate::rules::RuleViolation;
use crate::schedule::is_scheduled_on;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub scheduled_today: bool,
    pub completions_today: i32,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub can_complete: bool,
    pub next_available_at: Option<DateTime<Utc>>,
    /// Steps done today; always empty for stepless habits.
    pub completed_steps: BTreeSet<StepId>,
    pub blocked_by: Option<RuleViolation>,
}

impl Eligibility {
    pub fn check(&self) -> Result<(), RuleViolation> {
        match &self.blocked_by {
            Some(v) => Err(v.clone()),
            None => Ok(()),
        }
    }

    pub fn is_fully_completed(&self) -> bool {
        self.completions_today > 0
    }
}

pub fn evaluate(
    habit: &Habit,
    progress: &[ProgressEntry],
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Eligibility {
    let todays = progress.iter().filter(|p| p.date == today);

    let (completions_today, last_completed_at, completed_steps, ceiling) = match &habit.shape {
        HabitShape::Stepped(steps) => {
            let mut done = BTreeSet::new();
            let mut latest: Option<DateTime<Utc>> = None;
            for entry in todays {
                let Some(step_id) = &entry.step_id else {
                    continue;
                };
                if steps.iter().any(|s| &s.id == step_id) {
                    done.insert(step_id.clone());
                    latest = latest.max(Some(entry.completed_at));
                }
            }
            let full = done.len() == steps.len();
            // A stepped habit completes at most once per day whatever times_per_period says.
            (i32::from(full), latest.filter(|_| full), done, 1)
        }
        HabitShape::Stepless => {
            let mut count = 0;
            let mut latest: Option<DateTime<Utc>> = None;
            for entry in todays.filter(|p| p.step_id.is_none()) {
                count += 1;
                latest = latest.max(Some(entry.completed_at));
            }
            (count, latest, BTreeSet::new(), habit.rules.times_per_period)
        }
    };

    let scheduled_today = is_scheduled_on(&habit.rules.frequency, today);
    let mut blocked_by = if !scheduled_today {
        Some(RuleViolation::NotScheduledToday)
    } else if completions_today >= ceiling {
        Some(RuleViolation::MaxCompletionsReached)
    } else {
        None
    };

    let mut next_available_at = None;
    let cooldown_applies = habit.rules.times_per_period > 1
        && habit.rules.cooldown_minutes > 0
        && !matches!(habit.rules.frequency, Frequency::Weekly);
    if cooldown_applies && let Some(last) = last_completed_at {
        let ends = last + Duration::minutes(i64::from(habit.rules.cooldown_minutes));
        if now < ends {
            next_available_at = Some(ends);
            if blocked_by.is_none() {
                blocked_by = Some(RuleViolation::CooldownActive {
                    remaining_minutes: minutes_until(now, ends),
                });
            }
        }
    }

    Eligibility {
        scheduled_today,
        completions_today,
        last_completed_at,
        can_complete: blocked_by.is_none(),
        next_available_at,
        completed_steps,
        blocked_by,
    }
}

/// Whole minutes left, rounded up so a countdown never shows zero while still locked.
fn minutes_until(now: DateTime<Utc>, ends: DateTime<Utc>) -> i64 {
    let secs = (ends - now).num_seconds().max(0);
    (secs + 59) / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChildId, HabitId, HabitRules, HabitStep, Weekday};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn habit(frequency: Frequency, times: i32, cooldown: i32, shape: HabitShape) -> Habit {
        Habit {
            id: HabitId::from("h1"),
            child_id: ChildId::from("c1"),
            name: "Brush teeth".into(),
            rules: HabitRules {
                frequency,
                times_per_period: times,
                cooldown_minutes: cooldown,
                coins_per_completion: 10,
            },
            is_active: true,
            shape,
        }
    }

    fn done(at: DateTime<Utc>) -> ProgressEntry {
        ProgressEntry {
            step_id: None,
            date: at.date_naive(),
            completed_at: at,
        }
    }

    fn step_done(step: &str, at: DateTime<Utc>) -> ProgressEntry {
        ProgressEntry {
            step_id: Some(StepId::from(step)),
            ..done(at)
        }
    }

    fn three_steps() -> HabitShape {
        HabitShape::from_steps(
            ["a", "b", "c"]
                .iter()
                .enumerate()
                .map(|(i, id)| HabitStep {
                    id: StepId::from(*id),
                    name: id.to_uppercase(),
                    order_index: i as i32,
                })
                .collect(),
        )
    }

    #[test]
    fn fresh_habit_is_available() {
        let h = habit(Frequency::Daily, 1, 0, HabitShape::Stepless);
        let e = evaluate(&h, &[], today(), at(8, 0));
        assert!(e.can_complete);
        assert_eq!(e.completions_today, 0);
        assert_eq!(e.last_completed_at, None);
        assert_eq!(e.next_available_at, None);
    }

    #[test]
    fn stepless_ceiling_is_times_per_period() {
        let h = habit(Frequency::Daily, 3, 0, HabitShape::Stepless);
        let mut progress = vec![];
        for i in 0..3 {
            let e = evaluate(&h, &progress, today(), at(9, i));
            assert!(e.can_complete, "completion {} should be allowed", i + 1);
            progress.push(done(at(9, i)));
        }
        let e = evaluate(&h, &progress, today(), at(10, 0));
        assert_eq!(e.completions_today, 3);
        assert_eq!(e.check(), Err(RuleViolation::MaxCompletionsReached));
    }

    #[test]
    fn cooldown_blocks_until_it_elapses() {
        let h = habit(Frequency::Daily, 3, 60, HabitShape::Stepless);
        let progress = vec![done(at(8, 0))];

        let e = evaluate(&h, &progress, today(), at(8, 30));
        assert_eq!(
            e.check(),
            Err(RuleViolation::CooldownActive {
                remaining_minutes: 30
            })
        );
        assert_eq!(e.next_available_at, Some(at(9, 0)));

        let e = evaluate(&h, &progress, today(), at(9, 1));
        assert!(e.can_complete);
        assert_eq!(e.next_available_at, None);
    }

    #[test]
    fn cooldown_remaining_rounds_up() {
        let h = habit(Frequency::Daily, 2, 15, HabitShape::Stepless);
        let progress = vec![done(at(8, 0))];
        let now = at(8, 0) + Duration::seconds(30);
        let e = evaluate(&h, &progress, today(), now);
        assert_eq!(
            e.blocked_by,
            Some(RuleViolation::CooldownActive {
                remaining_minutes: 15
            })
        );
    }

    #[test]
    fn cooldown_ignored_for_single_completion_habits() {
        let h = habit(Frequency::Daily, 1, 60, HabitShape::Stepless);
        let e = evaluate(&h, &[done(at(8, 0))], today(), at(8, 10));
        assert_eq!(e.blocked_by, Some(RuleViolation::MaxCompletionsReached));
        assert_eq!(e.next_available_at, None);
    }

    #[test]
    fn weekly_habits_skip_the_cooldown() {
        let h = habit(Frequency::Weekly, 3, 60, HabitShape::Stepless);
        let e = evaluate(&h, &[done(at(8, 0))], today(), at(8, 5));
        assert!(e.can_complete);
        assert_eq!(e.next_available_at, None);
    }

    #[test]
    fn unscheduled_day_wins_over_other_reasons() {
        // 2024-01-01 is a Monday.
        let h = habit(
            Frequency::Custom([Weekday::Tue].into()),
            1,
            0,
            HabitShape::Stepless,
        );
        let e = evaluate(&h, &[], today(), at(8, 0));
        assert!(!e.scheduled_today);
        assert_eq!(e.check(), Err(RuleViolation::NotScheduledToday));
    }

    #[test]
    fn rows_from_other_days_do_not_count() {
        let h = habit(Frequency::Daily, 1, 0, HabitShape::Stepless);
        let yesterday = at(8, 0) - Duration::days(1);
        let e = evaluate(&h, &[done(yesterday)], today(), at(8, 0));
        assert!(e.can_complete);
        assert_eq!(e.completions_today, 0);
    }

    #[test]
    fn stepped_habit_counts_once_when_all_steps_done() {
        let h = habit(Frequency::Daily, 3, 0, three_steps());
        let partial = vec![step_done("a", at(7, 0)), step_done("b", at(7, 5))];
        let e = evaluate(&h, &partial, today(), at(7, 6));
        assert_eq!(e.completions_today, 0);
        assert_eq!(e.last_completed_at, None);
        assert_eq!(e.completed_steps.len(), 2);
        assert!(e.can_complete);

        let mut full = partial.clone();
        full.push(step_done("c", at(7, 10)));
        let e = evaluate(&h, &full, today(), at(7, 11));
        assert_eq!(e.completions_today, 1);
        assert_eq!(e.last_completed_at, Some(at(7, 10)));
        assert_eq!(e.check(), Err(RuleViolation::MaxCompletionsReached));
    }

    #[test]
    fn stepped_habit_ignores_stepless_rows_and_unknown_steps() {
        let h = habit(Frequency::Daily, 1, 0, three_steps());
        let progress = vec![done(at(7, 0)), step_done("zz", at(7, 1))];
        let e = evaluate(&h, &progress, today(), at(7, 2));
        assert!(e.completed_steps.is_empty());
        assert_eq!(e.completions_today, 0);
    }
}
