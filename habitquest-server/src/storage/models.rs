use crate::storage::schema::{
    children, habit_progress, habit_steps, habits, profiles, reward_redemptions, rewards, sessions,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub pin_hash: Option<String>,
    pub timezone: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub name: &'a str,
    pub timezone: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub profile_id: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub profile_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = children)]
#[diesel(belongs_to(Profile, foreign_key = parent_id))]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub age: i32,
    pub avatar_url: Option<String>,
    pub coin_balance: i32,
    pub current_streak: i32,
    pub last_active_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = children)]
pub struct NewChild<'a> {
    pub id: &'a str,
    pub parent_id: &'a str,
    pub name: &'a str,
    pub age: i32,
    pub avatar_url: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = habits)]
#[diesel(belongs_to(Child, foreign_key = child_id))]
pub struct HabitRow {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub frequency: String,
    pub allowed_days: Option<String>,
    pub times_per_period: i32,
    pub cooldown_minutes: i32,
    pub coins_per_completion: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = habits)]
#[diesel(treat_none_as_null = true)]
pub struct HabitChanges<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub icon: &'a str,
    pub frequency: &'a str,
    pub allowed_days: Option<&'a str>,
    pub times_per_period: i32,
    pub cooldown_minutes: i32,
    pub coins_per_completion: i32,
    pub is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = habits)]
pub struct NewHabit<'a> {
    pub id: &'a str,
    pub child_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub icon: &'a str,
    pub frequency: &'a str,
    pub allowed_days: Option<&'a str>,
    pub times_per_period: i32,
    pub cooldown_minutes: i32,
    pub coins_per_completion: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = habit_steps)]
#[diesel(belongs_to(HabitRow, foreign_key = habit_id))]
pub struct HabitStepRow {
    pub id: String,
    pub habit_id: String,
    pub name: String,
    pub order_index: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = habit_steps)]
pub struct NewHabitStep<'a> {
    pub id: String,
    pub habit_id: &'a str,
    pub name: &'a str,
    pub order_index: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = habit_progress)]
#[diesel(belongs_to(HabitRow, foreign_key = habit_id))]
pub struct ProgressRow {
    pub id: String,
    pub habit_id: String,
    pub child_id: String,
    pub step_id: Option<String>,
    pub date: NaiveDate,
    pub completed_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = habit_progress)]
pub struct NewProgress<'a> {
    pub id: &'a str,
    pub habit_id: &'a str,
    pub child_id: &'a str,
    pub step_id: Option<&'a str>,
    pub date: NaiveDate,
    pub completed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = rewards)]
pub struct RewardRow {
    pub id: String,
    pub parent_id: String,
    pub child_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub coin_cost: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = rewards)]
#[diesel(treat_none_as_null = true)]
pub struct RewardChanges<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub icon: &'a str,
    pub coin_cost: i32,
    pub is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = rewards)]
pub struct NewReward<'a> {
    pub id: &'a str,
    pub parent_id: &'a str,
    pub child_id: Option<&'a str>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub icon: &'a str,
    pub coin_cost: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = reward_redemptions)]
#[diesel(belongs_to(RewardRow, foreign_key = reward_id))]
pub struct RedemptionRow {
    pub id: String,
    pub child_id: String,
    pub reward_id: String,
    pub status: String,
    pub redeemed_at: NaiveDateTime,
    pub coin_cost: i32,
    pub decided_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = reward_redemptions)]
pub struct NewRedemption<'a> {
    pub id: &'a str,
    pub child_id: &'a str,
    pub reward_id: &'a str,
    pub status: &'a str,
    pub coin_cost: i32,
    pub redeemed_at: NaiveDateTime,
}
