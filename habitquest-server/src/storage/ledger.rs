//! Coin balance mutations. The connection helpers expect to run inside an
//! immediate transaction opened by the caller, so the read of the current balance
//! and the write of the new one cannot interleave with another writer.

use chrono::NaiveDate;
use diesel::prelude::*;
use tracing::info;

use super::models::Child;
use super::{StorageError, Store, require_child, schema};
use habitquest_shared::rules::RuleViolation;

fn write_balance(
    conn: &mut SqliteConnection,
    child: &str,
    balance: i32,
) -> Result<i32, StorageError> {
    use schema::children::dsl::*;
    Ok(diesel::update(children.filter(id.eq(child)))
        .set(coin_balance.eq(balance))
        .returning(coin_balance)
        .get_result(conn)?)
}

/// Adds `amount` to the balance and returns the new balance.
pub(crate) fn credit(
    conn: &mut SqliteConnection,
    child: &Child,
    amount: i32,
    reason: &str,
) -> Result<i32, StorageError> {
    if amount < 0 {
        return Err(StorageError::InvalidInput(format!(
            "credit amount must not be negative: {amount}"
        )));
    }
    let current = current_balance(conn, &child.id)?;
    let next = current.saturating_add(amount);
    let balance = write_balance(conn, &child.id, next)?;
    info!(child_id = %child.id, amount, previous = current, balance, reason, "coins credited");
    Ok(balance)
}

/// Subtracts `amount`, flooring the balance at zero. Returns the new balance.
pub(crate) fn debit_clamped(
    conn: &mut SqliteConnection,
    child: &Child,
    amount: i32,
    reason: &str,
) -> Result<i32, StorageError> {
    let current = current_balance(conn, &child.id)?;
    let next = (current - amount.max(0)).max(0);
    let balance = write_balance(conn, &child.id, next)?;
    info!(child_id = %child.id, amount, previous = current, balance, reason, "coins debited");
    Ok(balance)
}

/// Subtracts `amount` only when the balance covers it.
pub(crate) fn debit_exact(
    conn: &mut SqliteConnection,
    child: &Child,
    amount: i32,
    reason: &str,
) -> Result<i32, StorageError> {
    let current = current_balance(conn, &child.id)?;
    if current < amount {
        return Err(RuleViolation::InsufficientCoins {
            shortfall: amount - current,
        }
        .into());
    }
    let balance = write_balance(conn, &child.id, current - amount)?;
    info!(child_id = %child.id, amount, previous = current, balance, reason, "coins debited");
    Ok(balance)
}

pub(crate) fn current_balance(conn: &mut SqliteConnection, child: &str) -> Result<i32, StorageError> {
    use schema::children::dsl::*;
    Ok(children
        .filter(id.eq(child))
        .select(coin_balance)
        .first(conn)?)
}

/// Next streak value for a completion on `today`, given the last active day.
pub fn next_streak(current: i32, last_active: Option<NaiveDate>, today: NaiveDate) -> i32 {
    match last_active {
        Some(last) if last == today => current.max(1),
        Some(last) if today.pred_opt() == Some(last) => current + 1,
        _ => 1,
    }
}

/// Streak as shown to readers: a run that missed yesterday is already broken.
pub fn visible_streak(current: i32, last_active: Option<NaiveDate>, today: NaiveDate) -> i32 {
    match last_active {
        Some(last) if last == today || today.pred_opt() == Some(last) => current,
        _ => 0,
    }
}

pub(crate) fn record_activity(
    conn: &mut SqliteConnection,
    child: &Child,
    today: NaiveDate,
) -> Result<i32, StorageError> {
    use schema::children::dsl::*;
    let streak = next_streak(child.current_streak, child.last_active_date, today);
    diesel::update(children.filter(id.eq(&child.id)))
        .set((current_streak.eq(streak), last_active_date.eq(Some(today))))
        .execute(conn)?;
    if streak != child.current_streak {
        info!(child_id = %child.id, streak, "streak updated");
    }
    Ok(streak)
}

impl Store {
    /// Standalone ledger credit in its own transaction. Negative amounts are rejected.
    pub async fn credit_coins(
        &self,
        child: &str,
        amount: i32,
        reason: &str,
    ) -> Result<i32, StorageError> {
        let child_owned = child.to_string();
        let reason_owned = reason.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let c = require_child(conn, &child_owned)?;
                credit(conn, &c, amount, &reason_owned)
            })
        })
        .await
    }

    /// Standalone ledger debit; the balance never drops below zero.
    pub async fn debit_coins(
        &self,
        child: &str,
        amount: i32,
        reason: &str,
    ) -> Result<i32, StorageError> {
        let child_owned = child.to_string();
        let reason_owned = reason.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let c = require_child(conn, &child_owned)?;
                debit_clamped(conn, &c, amount, &reason_owned)
            })
        })
        .await
    }

    /// Administrative correction by a parent; overwrites the balance.
    pub async fn set_balance(&self, child: &str, balance: i32) -> Result<i32, StorageError> {
        if balance < 0 {
            return Err(StorageError::InvalidInput(
                "coin_balance cannot be negative".into(),
            ));
        }
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                let c = require_child(conn, &child_owned)?;
                let updated = write_balance(conn, &c.id, balance)?;
                info!(child_id = %c.id, previous = c.coin_balance, balance = updated, "balance corrected");
                Ok(updated)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn streak_extends_from_yesterday() {
        assert_eq!(next_streak(3, Some(d(2025, 3, 9)), d(2025, 3, 10)), 4);
    }

    #[test]
    fn streak_unchanged_on_same_day() {
        assert_eq!(next_streak(3, Some(d(2025, 3, 10)), d(2025, 3, 10)), 3);
        assert_eq!(next_streak(0, Some(d(2025, 3, 10)), d(2025, 3, 10)), 1);
    }

    #[test]
    fn streak_restarts_after_gap() {
        assert_eq!(next_streak(7, Some(d(2025, 3, 1)), d(2025, 3, 10)), 1);
        assert_eq!(next_streak(0, None, d(2025, 3, 10)), 1);
    }

    #[test]
    fn visible_streak_drops_stale_runs() {
        assert_eq!(visible_streak(5, Some(d(2025, 3, 9)), d(2025, 3, 10)), 5);
        assert_eq!(visible_streak(5, Some(d(2025, 3, 7)), d(2025, 3, 10)), 0);
        assert_eq!(visible_streak(0, None, d(2025, 3, 10)), 0);
    }

    #[test]
    fn streak_crosses_month_boundary() {
        assert_eq!(next_streak(2, Some(d(2025, 2, 28)), d(2025, 3, 1)), 3);
    }
}
