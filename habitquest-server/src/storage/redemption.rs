use chrono::{DateTime, Utc};
use diesel::prelude::*;
use habitquest_shared::domain::{Decision, RedemptionStatus};
use habitquest_shared::rules::RuleViolation;
use tracing::{info, warn};

use super::catalog::find_visible_reward;
use super::models::{NewRedemption, RedemptionRow, RewardRow};
use super::{StorageError, Store, ledger, require_child, schema};

/// A redemption joined with the reward it was made against.
#[derive(Debug, Clone)]
pub struct RedemptionWithReward {
    pub redemption: RedemptionRow,
    pub reward: RewardRow,
    /// Balance after the write that produced this value.
    pub coin_balance: i32,
}

fn load_redemption(
    conn: &mut SqliteConnection,
    child: &str,
    redemption: &str,
) -> Result<(RedemptionRow, RewardRow), StorageError> {
    use schema::reward_redemptions::dsl as rr;
    use schema::rewards;
    rr::reward_redemptions
        .inner_join(rewards::table)
        .filter(rr::id.eq(redemption))
        .filter(rr::child_id.eq(child))
        .select((RedemptionRow::as_select(), RewardRow::as_select()))
        .first(conn)
        .optional()?
        .ok_or_else(|| StorageError::not_found("redemption", redemption))
}

impl Store {
    /// Spends coins on a reward. The redemption starts pending and keeps the cost
    /// paid so a later denial refunds exactly that amount.
    pub async fn redeem(
        &self,
        child: &str,
        reward: &str,
        now: DateTime<Utc>,
    ) -> Result<RedemptionWithReward, StorageError> {
        let child_owned = child.to_string();
        let reward_owned = reward.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let c = require_child(conn, &child_owned)?;
                let r = find_visible_reward(conn, &c, &reward_owned)?
                    .ok_or_else(|| StorageError::not_found("reward", &reward_owned))?;
                if !r.is_active {
                    return Err(RuleViolation::RewardInactive.into());
                }
                let balance = ledger::debit_exact(conn, &c, r.coin_cost, "reward_redeemed")?;

                let new_id = uuid::Uuid::new_v4().to_string();
                let row = NewRedemption {
                    id: &new_id,
                    child_id: &c.id,
                    reward_id: &r.id,
                    status: RedemptionStatus::Pending.as_str(),
                    coin_cost: r.coin_cost,
                    redeemed_at: now.naive_utc(),
                };
                let redemption = diesel::insert_into(schema::reward_redemptions::table)
                    .values(&row)
                    .returning(RedemptionRow::as_returning())
                    .get_result(conn)?;
                info!(child_id = %c.id, reward_id = %r.id, redemption_id = %new_id, cost = r.coin_cost, "reward redeemed");
                Ok(RedemptionWithReward {
                    redemption,
                    reward: r,
                    coin_balance: balance,
                })
            })
        })
        .await
    }

    /// Moves a pending redemption to approved or denied. Denial refunds the cost
    /// recorded at redemption time.
    pub async fn decide_redemption(
        &self,
        child: &str,
        redemption: &str,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<RedemptionWithReward, StorageError> {
        let child_owned = child.to_string();
        let redemption_owned = redemption.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                use schema::reward_redemptions::dsl::*;
                let c = require_child(conn, &child_owned)?;
                let (current, reward) = load_redemption(conn, &c.id, &redemption_owned)?;
                let from = current.status.parse::<RedemptionStatus>()?;
                let to = from.transition(decision)?;

                // Guard on the status we read so a concurrent decision cannot apply twice.
                let decided = diesel::update(
                    reward_redemptions
                        .filter(id.eq(&current.id))
                        .filter(status.eq(from.as_str())),
                )
                .set((status.eq(to.as_str()), decided_at.eq(Some(now.naive_utc()))))
                .returning(RedemptionRow::as_returning())
                .get_result(conn)
                .optional()?;
                let Some(decided) = decided else {
                    warn!(redemption_id = %current.id, "redemption changed while deciding");
                    return Err(RuleViolation::RedemptionClosed { status: from }.into());
                };

                let balance = match to {
                    RedemptionStatus::Denied => {
                        ledger::credit(conn, &c, decided.coin_cost, "redemption_denied")?
                    }
                    _ => ledger::current_balance(conn, &c.id)?,
                };
                info!(
                    child_id = %c.id,
                    redemption_id = %decided.id,
                    status = %to,
                    refund = if to == RedemptionStatus::Denied { decided.coin_cost } else { 0 },
                    "redemption decided"
                );
                Ok(RedemptionWithReward {
                    redemption: decided,
                    reward,
                    coin_balance: balance,
                })
            })
        })
        .await
    }

    /// Newest first.
    pub async fn list_redemptions(
        &self,
        child: &str,
        status_filter: Option<RedemptionStatus>,
    ) -> Result<Vec<RedemptionWithReward>, StorageError> {
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            use schema::reward_redemptions::dsl as rr;
            use schema::rewards;
            let c = require_child(conn, &child_owned)?;
            let mut query = rr::reward_redemptions
                .inner_join(rewards::table)
                .filter(rr::child_id.eq(c.id.clone()))
                .select((RedemptionRow::as_select(), RewardRow::as_select()))
                .into_boxed();
            if let Some(s) = status_filter {
                query = query.filter(rr::status.eq(s.as_str()));
            }
            let rows: Vec<(RedemptionRow, RewardRow)> =
                query.order(rr::redeemed_at.desc()).load(conn)?;
            Ok(rows
                .into_iter()
                .map(|(redemption, reward)| RedemptionWithReward {
                    redemption,
                    reward,
                    coin_balance: c.coin_balance,
                })
                .collect())
        })
        .await
    }
}
