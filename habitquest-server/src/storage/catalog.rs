use diesel::prelude::*;
use habitquest_shared::domain::{
    Frequency, Habit, HabitRules, HabitShape, HabitStep, validate_coin_cost,
};
use tracing::info;

use super::models::{
    Child, HabitChanges, HabitRow, HabitStepRow, NewHabit, NewHabitStep, NewReward, RewardChanges,
    RewardRow,
};
use super::{StorageError, Store, non_empty, require_child, schema};

/// Parent-authored habit definition used for both create and update.
#[derive(Debug, Clone)]
pub struct HabitDraft {
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub rules: HabitRules,
    pub is_active: bool,
    /// Step names in display order. Empty means the habit is stepless.
    pub steps: Vec<String>,
}

impl HabitDraft {
    fn normalized(mut self) -> Result<Self, StorageError> {
        self.name = non_empty("name", &self.name)?;
        self.icon = non_empty("icon", &self.icon)?;
        self.rules.validate()?;
        self.steps = self
            .steps
            .iter()
            .map(|s| non_empty("step name", s))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct RewardDraft {
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub coin_cost: i32,
    pub is_active: bool,
    pub shared: bool,
}

impl RewardDraft {
    fn normalized(mut self) -> Result<Self, StorageError> {
        self.name = non_empty("name", &self.name)?;
        self.icon = non_empty("icon", &self.icon)?;
        validate_coin_cost(self.coin_cost)?;
        Ok(self)
    }
}

/// Rebuilds the domain habit from its stored row and steps.
pub(crate) fn to_domain(row: &HabitRow, steps: &[HabitStepRow]) -> Result<Habit, StorageError> {
    let frequency = Frequency::from_columns(&row.frequency, row.allowed_days.as_deref())?;
    let shape = HabitShape::from_steps(
        steps
            .iter()
            .map(|s| HabitStep {
                id: s.id.as_str().into(),
                name: s.name.clone(),
                order_index: s.order_index,
            })
            .collect(),
    );
    Ok(Habit {
        id: row.id.as_str().into(),
        child_id: row.child_id.as_str().into(),
        name: row.name.clone(),
        rules: HabitRules {
            frequency,
            times_per_period: row.times_per_period,
            cooldown_minutes: row.cooldown_minutes,
            coins_per_completion: row.coins_per_completion,
        },
        is_active: row.is_active,
        shape,
    })
}

/// Loads a child's habits with their ordered steps. `only` narrows to one habit.
pub(crate) fn load_habits(
    conn: &mut SqliteConnection,
    child: &str,
    active_only: bool,
    only: Option<&str>,
) -> Result<Vec<(HabitRow, Vec<HabitStepRow>)>, StorageError> {
    use schema::habits::dsl as h;
    let mut query = h::habits
        .filter(h::child_id.eq(child.to_string()))
        .select(HabitRow::as_select())
        .into_boxed();
    if active_only {
        query = query.filter(h::is_active.eq(true));
    }
    if let Some(habit) = only {
        query = query.filter(h::id.eq(habit.to_string()));
    }
    let rows: Vec<HabitRow> = query
        .order((h::created_at.asc(), h::name.asc()))
        .load(conn)?;

    let steps: Vec<HabitStepRow> = HabitStepRow::belonging_to(&rows)
        .select(HabitStepRow::as_select())
        .order(schema::habit_steps::order_index.asc())
        .load(conn)?;
    let grouped = steps.grouped_by(&rows);
    Ok(rows.into_iter().zip(grouped).collect())
}

fn insert_steps(
    conn: &mut SqliteConnection,
    habit: &str,
    names: &[String],
) -> Result<(), StorageError> {
    use schema::habit_steps;
    let rows: Vec<NewHabitStep> = names
        .iter()
        .enumerate()
        .map(|(i, name)| NewHabitStep {
            id: uuid::Uuid::new_v4().to_string(),
            habit_id: habit,
            name,
            order_index: i as i32,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(habit_steps::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

/// Rewards a child may see: the ones assigned to them plus the parent's shared ones.
pub(crate) fn find_visible_reward(
    conn: &mut SqliteConnection,
    child: &Child,
    reward: &str,
) -> Result<Option<RewardRow>, StorageError> {
    use schema::rewards::dsl::*;
    Ok(rewards
        .filter(id.eq(reward))
        .filter(parent_id.eq(&child.parent_id))
        .filter(child_id.eq(&child.id).or(child_id.is_null()))
        .select(RewardRow::as_select())
        .first(conn)
        .optional()?)
}

impl Store {
    pub async fn list_habits(
        &self,
        child: &str,
        active_only: bool,
    ) -> Result<Vec<(HabitRow, Vec<HabitStepRow>)>, StorageError> {
        let child_owned = child.to_string();
        self.with_conn(move |conn| load_habits(conn, &child_owned, active_only, None))
            .await
    }

    pub async fn create_habit(&self, child: &str, draft: HabitDraft) -> Result<String, StorageError> {
        use schema::habits;
        let draft = draft.normalized()?;
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                require_child(conn, &child_owned)?;
                let new_id = uuid::Uuid::new_v4().to_string();
                let (frequency, allowed_days) = draft.rules.frequency.to_columns();
                let row = NewHabit {
                    id: &new_id,
                    child_id: &child_owned,
                    name: &draft.name,
                    description: draft.description.as_deref(),
                    icon: &draft.icon,
                    frequency,
                    allowed_days: allowed_days.as_deref(),
                    times_per_period: draft.rules.times_per_period,
                    cooldown_minutes: draft.rules.effective_cooldown(),
                    coins_per_completion: draft.rules.coins_per_completion,
                    is_active: draft.is_active,
                };
                diesel::insert_into(habits::table)
                    .values(&row)
                    .execute(conn)?;
                insert_steps(conn, &new_id, &draft.steps)?;
                info!(child_id = %child_owned, habit_id = %new_id, steps = draft.steps.len(), "habit created");
                Ok(new_id)
            })
        })
        .await
    }

    /// Rewrites the habit and replaces its step list. Progress recorded against the
    /// old steps goes away with them.
    pub async fn update_habit(
        &self,
        child: &str,
        habit: &str,
        draft: HabitDraft,
    ) -> Result<(), StorageError> {
        let draft = draft.normalized()?;
        let child_owned = child.to_string();
        let habit_owned = habit.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                use schema::habits::dsl::*;
                let (freq, days) = draft.rules.frequency.to_columns();
                let changes = HabitChanges {
                    name: &draft.name,
                    description: draft.description.as_deref(),
                    icon: &draft.icon,
                    frequency: freq,
                    allowed_days: days.as_deref(),
                    times_per_period: draft.rules.times_per_period,
                    cooldown_minutes: draft.rules.effective_cooldown(),
                    coins_per_completion: draft.rules.coins_per_completion,
                    is_active: draft.is_active,
                };
                let updated = diesel::update(
                    habits
                        .filter(id.eq(&habit_owned))
                        .filter(child_id.eq(&child_owned)),
                )
                .set(&changes)
                .execute(conn)?;
                if updated == 0 {
                    return Err(StorageError::not_found("habit", &habit_owned));
                }

                {
                    use schema::habit_steps::dsl as s;
                    diesel::delete(s::habit_steps.filter(s::habit_id.eq(&habit_owned)))
                        .execute(conn)?;
                }
                insert_steps(conn, &habit_owned, &draft.steps)?;
                info!(child_id = %child_owned, habit_id = %habit_owned, steps = draft.steps.len(), "habit updated");
                Ok(())
            })
        })
        .await
    }

    pub async fn delete_habit(&self, child: &str, habit: &str) -> Result<bool, StorageError> {
        use schema::habits::dsl::*;
        let child_owned = child.to_string();
        let habit_owned = habit.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(
                habits
                    .filter(id.eq(&habit_owned))
                    .filter(child_id.eq(&child_owned)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn list_rewards(
        &self,
        child: &str,
        active_only: bool,
    ) -> Result<Vec<RewardRow>, StorageError> {
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            use schema::rewards::dsl::*;
            let c = require_child(conn, &child_owned)?;
            let mut query = rewards
                .filter(parent_id.eq(c.parent_id.clone()))
                .filter(child_id.eq(c.id.clone()).or(child_id.is_null()))
                .select(RewardRow::as_select())
                .into_boxed();
            if active_only {
                query = query.filter(is_active.eq(true));
            }
            Ok(query.order((coin_cost.asc(), name.asc())).load(conn)?)
        })
        .await
    }

    pub async fn get_reward(&self, child: &str, reward: &str) -> Result<RewardRow, StorageError> {
        let child_owned = child.to_string();
        let reward_owned = reward.to_string();
        self.with_conn(move |conn| {
            let c = require_child(conn, &child_owned)?;
            find_visible_reward(conn, &c, &reward_owned)?
                .ok_or_else(|| StorageError::not_found("reward", &reward_owned))
        })
        .await
    }

    pub async fn create_reward(
        &self,
        child: &str,
        draft: RewardDraft,
    ) -> Result<RewardRow, StorageError> {
        use schema::rewards;
        let draft = draft.normalized()?;
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            let c = require_child(conn, &child_owned)?;
            let new_id = uuid::Uuid::new_v4().to_string();
            let row = NewReward {
                id: &new_id,
                parent_id: &c.parent_id,
                child_id: (!draft.shared).then_some(c.id.as_str()),
                name: &draft.name,
                description: draft.description.as_deref(),
                icon: &draft.icon,
                coin_cost: draft.coin_cost,
                is_active: draft.is_active,
            };
            let created = diesel::insert_into(rewards::table)
                .values(&row)
                .returning(RewardRow::as_returning())
                .get_result(conn)?;
            info!(child_id = %c.id, reward_id = %new_id, shared = draft.shared, "reward created");
            Ok(created)
        })
        .await
    }

    /// Cost changes only affect future redemptions; pending ones keep their snapshot.
    pub async fn update_reward(
        &self,
        child: &str,
        reward: &str,
        draft: RewardDraft,
    ) -> Result<RewardRow, StorageError> {
        let draft = draft.normalized()?;
        let child_owned = child.to_string();
        let reward_owned = reward.to_string();
        self.with_conn(move |conn| {
            use schema::rewards::dsl::*;
            let c = require_child(conn, &child_owned)?;
            let existing = find_visible_reward(conn, &c, &reward_owned)?
                .ok_or_else(|| StorageError::not_found("reward", &reward_owned))?;
            let changes = RewardChanges {
                name: &draft.name,
                description: draft.description.as_deref(),
                icon: &draft.icon,
                coin_cost: draft.coin_cost,
                is_active: draft.is_active,
            };
            Ok(diesel::update(rewards.filter(id.eq(&existing.id)))
                .set((&changes, child_id.eq((!draft.shared).then_some(c.id.as_str()))))
                .returning(RewardRow::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    /// Refuses while redemptions of the reward are still pending, since deleting
    /// would drop them without a refund.
    pub async fn delete_reward(&self, child: &str, reward: &str) -> Result<bool, StorageError> {
        let child_owned = child.to_string();
        let reward_owned = reward.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let c = require_child(conn, &child_owned)?;
                let Some(existing) = find_visible_reward(conn, &c, &reward_owned)? else {
                    return Ok(false);
                };
                let pending: i64 = {
                    use schema::reward_redemptions::dsl::*;
                    reward_redemptions
                        .filter(reward_id.eq(&existing.id))
                        .filter(status.eq("pending"))
                        .count()
                        .get_result(conn)?
                };
                if pending > 0 {
                    return Err(StorageError::InvalidInput(format!(
                        "reward has {pending} pending redemption(s); approve or deny them first"
                    )));
                }
                use schema::rewards::dsl::*;
                let deleted = diesel::delete(rewards.filter(id.eq(&existing.id))).execute(conn)?;
                Ok(deleted > 0)
            })
        })
        .await
    }
}
