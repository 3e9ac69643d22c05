use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use habitquest_shared::domain::{Habit, ProgressEntry, StepId};
use habitquest_shared::eligibility::{Eligibility, evaluate};
use habitquest_shared::rules::RuleViolation;
use tracing::{debug, info};

use super::catalog::{load_habits, to_domain};
use super::models::{Child, HabitRow, HabitStepRow, NewProgress, ProgressRow};
use super::{StorageError, Store, ledger, local_today, require_child, schema};

/// A habit as the child sees it right now.
#[derive(Debug, Clone)]
pub struct HabitState {
    pub row: HabitRow,
    pub steps: Vec<HabitStepRow>,
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub coins_awarded: i32,
    pub coin_balance: i32,
    /// Streak after this write. Undoing a step never lowers it, so after an undo it
    /// may still count the day of the removed completion.
    pub current_streak: i32,
    /// True when this write made the habit complete (always for stepless habits).
    pub habit_completed: bool,
}

fn progress_for_day(
    conn: &mut SqliteConnection,
    child: &str,
    habits: &[String],
    day: NaiveDate,
) -> Result<Vec<ProgressRow>, StorageError> {
    use schema::habit_progress::dsl::*;
    Ok(habit_progress
        .filter(child_id.eq(child))
        .filter(habit_id.eq_any(habits))
        .filter(date.eq(day))
        .select(ProgressRow::as_select())
        .load(conn)?)
}

fn to_entries<'a>(rows: impl IntoIterator<Item = &'a ProgressRow>) -> Vec<ProgressEntry> {
    rows.into_iter()
        .map(|r| ProgressEntry {
            step_id: r.step_id.as_deref().map(StepId::from),
            date: r.date,
            completed_at: r.completed_at.and_utc(),
        })
        .collect()
}

/// Everything a completion write needs, read inside the write transaction.
struct Snapshot {
    child: Child,
    habit: Habit,
    today: NaiveDate,
    eligibility: Eligibility,
}

fn snapshot(
    conn: &mut SqliteConnection,
    child: &str,
    habit: &str,
    now: DateTime<Utc>,
) -> Result<Snapshot, StorageError> {
    let child = require_child(conn, child)?;
    let today = local_today(conn, &child, now)?;
    let (row, steps) = load_habits(conn, &child.id, false, Some(habit))?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::not_found("habit", habit))?;
    let habit = to_domain(&row, &steps)?;
    let progress = progress_for_day(conn, &child.id, &[row.id.clone()], today)?;
    let eligibility = evaluate(&habit, &to_entries(&progress), today, now);
    Ok(Snapshot {
        child,
        habit,
        today,
        eligibility,
    })
}

fn insert_progress(
    conn: &mut SqliteConnection,
    snap: &Snapshot,
    step: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    use schema::habit_progress;
    let new_id = uuid::Uuid::new_v4().to_string();
    let row = NewProgress {
        id: &new_id,
        habit_id: snap.habit.id.as_str(),
        child_id: &snap.child.id,
        step_id: step,
        date: snap.today,
        completed_at: now.naive_utc(),
    };
    diesel::insert_into(habit_progress::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

/// Credits the habit reward and extends the streak.
fn award(
    conn: &mut SqliteConnection,
    snap: &Snapshot,
) -> Result<CompletionOutcome, StorageError> {
    let coins = snap.habit.rules.coins_per_completion;
    let balance = ledger::credit(conn, &snap.child, coins, "habit_completed")?;
    let streak = ledger::record_activity(conn, &snap.child, snap.today)?;
    Ok(CompletionOutcome {
        coins_awarded: coins,
        coin_balance: balance,
        current_streak: streak,
        habit_completed: true,
    })
}

impl Store {
    /// Today's view of a child's habits, evaluated at `now`.
    pub async fn habit_board(
        &self,
        child: &str,
        active_only: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<HabitState>, StorageError> {
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            let c = require_child(conn, &child_owned)?;
            let today = local_today(conn, &c, now)?;
            let habits = load_habits(conn, &c.id, active_only, None)?;
            let ids: Vec<String> = habits.iter().map(|(h, _)| h.id.clone()).collect();
            let progress = progress_for_day(conn, &c.id, &ids, today)?;

            habits
                .into_iter()
                .map(|(row, steps)| {
                    let habit = to_domain(&row, &steps)?;
                    let entries = to_entries(progress.iter().filter(|p| p.habit_id == row.id));
                    let eligibility = evaluate(&habit, &entries, today, now);
                    Ok(HabitState {
                        row,
                        steps,
                        eligibility,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn habit_state(
        &self,
        child: &str,
        habit: &str,
        now: DateTime<Utc>,
    ) -> Result<HabitState, StorageError> {
        let child_owned = child.to_string();
        let habit_owned = habit.to_string();
        self.with_conn(move |conn| {
            let c = require_child(conn, &child_owned)?;
            let today = local_today(conn, &c, now)?;
            let (row, steps) = load_habits(conn, &c.id, false, Some(&habit_owned))?
                .into_iter()
                .next()
                .ok_or_else(|| StorageError::not_found("habit", &habit_owned))?;
            let habit = to_domain(&row, &steps)?;
            let progress = progress_for_day(conn, &c.id, &[row.id.clone()], today)?;
            let eligibility = evaluate(&habit, &to_entries(&progress), today, now);
            Ok(HabitState {
                row,
                steps,
                eligibility,
            })
        })
        .await
    }

    /// Records one completion of a stepless habit and credits its coins.
    pub async fn complete_habit(
        &self,
        child: &str,
        habit: &str,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StorageError> {
        let child_owned = child.to_string();
        let habit_owned = habit.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let snap = snapshot(conn, &child_owned, &habit_owned, now)?;
                if !snap.habit.is_active {
                    return Err(RuleViolation::HabitInactive.into());
                }
                if !snap.habit.shape.steps().is_empty() {
                    return Err(StorageError::InvalidInput(
                        "habit has steps; complete them individually".into(),
                    ));
                }
                snap.eligibility.check()?;
                insert_progress(conn, &snap, None, now)?;
                let outcome = award(conn, &snap)?;
                info!(
                    child_id = %snap.child.id,
                    habit_id = %snap.habit.id,
                    completion = snap.eligibility.completions_today + 1,
                    coins = outcome.coins_awarded,
                    "habit completed"
                );
                Ok(outcome)
            })
        })
        .await
    }

    /// Marks one step done. Coins are credited only when this is the last open step.
    pub async fn complete_step(
        &self,
        child: &str,
        habit: &str,
        step: &str,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StorageError> {
        let child_owned = child.to_string();
        let habit_owned = habit.to_string();
        let target = StepId::from(step);
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let snap = snapshot(conn, &child_owned, &habit_owned, now)?;
                if !snap.habit.is_active {
                    return Err(RuleViolation::HabitInactive.into());
                }
                if !snap.habit.has_step(&target) {
                    return Err(StorageError::not_found("step", target.as_str()));
                }
                if !snap.eligibility.scheduled_today {
                    return Err(RuleViolation::NotScheduledToday.into());
                }
                if snap.eligibility.completed_steps.contains(&target) {
                    return Err(RuleViolation::AlreadyCompleted.into());
                }
                insert_progress(conn, &snap, Some(target.as_str()), now)?;

                let done = snap.eligibility.completed_steps.len() + 1;
                let total = snap.habit.shape.steps().len();
                debug!(child_id = %snap.child.id, habit_id = %snap.habit.id, step_id = %target, done, total, "step completed");
                if done < total {
                    return Ok(CompletionOutcome {
                        coins_awarded: 0,
                        coin_balance: snap.child.coin_balance,
                        current_streak: snap.child.current_streak,
                        habit_completed: false,
                    });
                }
                let outcome = award(conn, &snap)?;
                info!(
                    child_id = %snap.child.id,
                    habit_id = %snap.habit.id,
                    coins = outcome.coins_awarded,
                    "habit completed"
                );
                Ok(outcome)
            })
        })
        .await
    }

    /// Removes today's record of a step. Un-completing a finished habit takes its
    /// coins back, floored at zero; the streak is left alone.
    pub async fn uncomplete_step(
        &self,
        child: &str,
        habit: &str,
        step: &str,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StorageError> {
        let child_owned = child.to_string();
        let habit_owned = habit.to_string();
        let target = StepId::from(step);
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let snap = snapshot(conn, &child_owned, &habit_owned, now)?;
                if !snap.habit.has_step(&target) {
                    return Err(StorageError::not_found("step", target.as_str()));
                }
                if !snap.eligibility.completed_steps.contains(&target) {
                    return Err(RuleViolation::NotCompleted.into());
                }
                {
                    use schema::habit_progress::dsl::*;
                    diesel::delete(
                        habit_progress
                            .filter(habit_id.eq(snap.habit.id.as_str()))
                            .filter(child_id.eq(&snap.child.id))
                            .filter(step_id.eq(target.as_str()))
                            .filter(date.eq(snap.today)),
                    )
                    .execute(conn)?;
                }

                let mut balance = snap.child.coin_balance;
                let mut revoked = 0;
                if snap.eligibility.is_fully_completed() {
                    revoked = snap.habit.rules.coins_per_completion;
                    balance = ledger::debit_clamped(conn, &snap.child, revoked, "habit_uncompleted")?;
                }
                debug!(child_id = %snap.child.id, habit_id = %snap.habit.id, step_id = %target, revoked, "step uncompleted");
                Ok(CompletionOutcome {
                    coins_awarded: -revoked,
                    coin_balance: balance,
                    current_streak: snap.child.current_streak,
                    habit_completed: false,
                })
            })
        })
        .await
    }
}
