use chrono::{DateTime, Duration, TimeZone, Utc};
use habitquest_server::server::ParentConfig;
use habitquest_server::storage::{HabitDraft, RewardDraft, StorageError, Store};
use habitquest_shared::domain::{Decision, Frequency, HabitRules, RedemptionStatus, Weekday};
use habitquest_shared::rules::RuleViolation;
use std::collections::BTreeSet;

const PARENT_EMAIL: &str = "parent@example.com";

struct Fixture {
    store: Store,
    parent_id: String,
    child_id: String,
    _tempdir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("store.db");
    let store = Store::connect_sqlite(db_path.to_str().unwrap())
        .await
        .expect("db");
    store
        .seed_parents(
            &[ParentConfig {
                email: PARENT_EMAIL.into(),
                name: "Parent".into(),
                password_hash: "unused".into(),
                timezone: None,
            }],
            "UTC",
        )
        .await
        .expect("seed");
    let parent_id = store
        .get_profile_by_email(PARENT_EMAIL)
        .await
        .unwrap()
        .expect("profile")
        .id;
    let child = store
        .create_child(&parent_id, "Alice", 8, None)
        .await
        .expect("child");
    Fixture {
        store,
        parent_id,
        child_id: child.id,
        _tempdir: dir,
    }
}

/// 2025-03-10 is a Monday.
fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
}

fn habit(frequency: Frequency, times: i32, cooldown: i32, coins: i32, steps: &[&str]) -> HabitDraft {
    HabitDraft {
        name: "Brush teeth".into(),
        description: None,
        icon: "tooth".into(),
        rules: HabitRules {
            frequency,
            times_per_period: times,
            cooldown_minutes: cooldown,
            coins_per_completion: coins,
        },
        is_active: true,
        steps: steps.iter().map(|s| s.to_string()).collect(),
    }
}

fn reward(cost: i32) -> RewardDraft {
    RewardDraft {
        name: "Ice cream".into(),
        description: Some("One scoop".into()),
        icon: "ice".into(),
        coin_cost: cost,
        is_active: true,
        shared: false,
    }
}

async fn balance(f: &Fixture) -> i32 {
    f.store
        .get_child(&f.child_id)
        .await
        .unwrap()
        .unwrap()
        .coin_balance
}

async fn step_ids(f: &Fixture, habit_id: &str) -> Vec<String> {
    f.store
        .habit_state(&f.child_id, habit_id, at(10, 8, 0))
        .await
        .unwrap()
        .steps
        .into_iter()
        .map(|s| s.id)
        .collect()
}

fn rule(err: StorageError) -> RuleViolation {
    match err {
        StorageError::Rule(v) => v,
        other => panic!("expected rule violation, got {other:?}"),
    }
}

#[tokio::test]
async fn stepless_habit_stops_at_daily_ceiling() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 2, 0, 10, &[]))
        .await
        .unwrap();

    let first = f.store.complete_habit(&f.child_id, &h, at(10, 8, 0)).await.unwrap();
    assert_eq!(first.coins_awarded, 10);
    assert_eq!(first.coin_balance, 10);
    let second = f.store.complete_habit(&f.child_id, &h, at(10, 8, 1)).await.unwrap();
    assert_eq!(second.coin_balance, 20);

    let err = f
        .store
        .complete_habit(&f.child_id, &h, at(10, 9, 0))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::MaxCompletionsReached);
    assert_eq!(balance(&f).await, 20);

    // A new local day resets the count
    let next_day = f.store.complete_habit(&f.child_id, &h, at(11, 8, 0)).await.unwrap();
    assert_eq!(next_day.coin_balance, 30);
}

#[tokio::test]
async fn cooldown_reports_remaining_minutes() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 3, 60, 5, &[]))
        .await
        .unwrap();

    f.store.complete_habit(&f.child_id, &h, at(10, 10, 0)).await.unwrap();
    let err = f
        .store
        .complete_habit(&f.child_id, &h, at(10, 10, 30))
        .await
        .unwrap_err();
    assert_eq!(
        rule(err),
        RuleViolation::CooldownActive {
            remaining_minutes: 30
        }
    );

    let board = f.store.habit_board(&f.child_id, true, at(10, 10, 30)).await.unwrap();
    assert_eq!(board.len(), 1);
    assert!(!board[0].eligibility.can_complete);
    assert_eq!(board[0].eligibility.next_available_at, Some(at(10, 11, 0)));

    let ok = f.store.complete_habit(&f.child_id, &h, at(10, 11, 1)).await.unwrap();
    assert_eq!(ok.coin_balance, 10);
}

#[tokio::test]
async fn unscheduled_day_is_rejected_without_side_effects() {
    let f = fixture().await;
    let tuesday_only = Frequency::Custom(BTreeSet::from([Weekday::Tue]));
    let h = f
        .store
        .create_habit(&f.child_id, habit(tuesday_only, 1, 0, 10, &[]))
        .await
        .unwrap();

    let err = f
        .store
        .complete_habit(&f.child_id, &h, at(10, 9, 0))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::NotScheduledToday);
    assert_eq!(balance(&f).await, 0);

    let state = f.store.habit_state(&f.child_id, &h, at(10, 9, 0)).await.unwrap();
    assert_eq!(state.eligibility.completions_today, 0);

    f.store.complete_habit(&f.child_id, &h, at(11, 9, 0)).await.unwrap();
    assert_eq!(balance(&f).await, 10);
}

#[tokio::test]
async fn stepped_habit_pays_once_when_last_step_is_done() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(
            &f.child_id,
            habit(Frequency::Daily, 1, 0, 15, &["Wash", "Dry", "Fold"]),
        )
        .await
        .unwrap();
    let steps = step_ids(&f, &h).await;
    assert_eq!(steps.len(), 3);

    for (i, step) in steps.iter().take(2).enumerate() {
        let out = f
            .store
            .complete_step(&f.child_id, &h, step, at(10, 8, i as u32))
            .await
            .unwrap();
        assert_eq!(out.coins_awarded, 0);
        assert!(!out.habit_completed);
    }
    assert_eq!(balance(&f).await, 0);

    let err = f
        .store
        .complete_step(&f.child_id, &h, &steps[0], at(10, 8, 5))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::AlreadyCompleted);

    let last = f
        .store
        .complete_step(&f.child_id, &h, &steps[2], at(10, 8, 6))
        .await
        .unwrap();
    assert!(last.habit_completed);
    assert_eq!(last.coins_awarded, 15);
    assert_eq!(last.coin_balance, 15);

    // Stepless completion is not a shortcut for stepped habits
    let err = f
        .store
        .complete_habit(&f.child_id, &h, at(10, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));
}

#[tokio::test]
async fn uncompleting_a_finished_habit_takes_coins_back_floored_at_zero() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 1, 0, 15, &["A", "B"]))
        .await
        .unwrap();
    let steps = step_ids(&f, &h).await;
    for step in &steps {
        f.store
            .complete_step(&f.child_id, &h, step, at(10, 8, 0))
            .await
            .unwrap();
    }
    assert_eq!(balance(&f).await, 15);
    f.store.set_balance(&f.child_id, 5).await.unwrap();

    let out = f
        .store
        .uncomplete_step(&f.child_id, &h, &steps[1], at(10, 9, 0))
        .await
        .unwrap();
    assert_eq!(out.coins_awarded, -15);
    assert_eq!(out.coin_balance, 0);
    // The streak earned by the undone completion is kept
    assert_eq!(out.current_streak, 1);

    // Undoing another step of the now-partial habit is free
    let out = f
        .store
        .uncomplete_step(&f.child_id, &h, &steps[0], at(10, 9, 1))
        .await
        .unwrap();
    assert_eq!(out.coins_awarded, 0);

    let err = f
        .store
        .uncomplete_step(&f.child_id, &h, &steps[0], at(10, 9, 2))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::NotCompleted);
}

#[tokio::test]
async fn denial_refunds_the_cost_paid_at_redemption() {
    let f = fixture().await;
    f.store.set_balance(&f.child_id, 50).await.unwrap();
    let r = f.store.create_reward(&f.child_id, reward(30)).await.unwrap();

    let redeemed = f.store.redeem(&f.child_id, &r.id, at(10, 12, 0)).await.unwrap();
    assert_eq!(redeemed.coin_balance, 20);
    assert_eq!(redeemed.redemption.status, "pending");
    assert_eq!(redeemed.redemption.coin_cost, 30);

    // Repricing does not change what a pending redemption refunds
    let mut repriced = reward(100);
    repriced.name = r.name.clone();
    f.store
        .update_reward(&f.child_id, &r.id, repriced)
        .await
        .unwrap();
    let current = f.store.get_reward(&f.child_id, &r.id).await.unwrap();
    assert_eq!(current.coin_cost, 100);

    let denied = f
        .store
        .decide_redemption(&f.child_id, &redeemed.redemption.id, Decision::Deny, at(10, 13, 0))
        .await
        .unwrap();
    assert_eq!(denied.redemption.status, "denied");
    assert_eq!(denied.coin_balance, 50);
    assert!(denied.redemption.decided_at.is_some());

    for decision in [Decision::Deny, Decision::Approve] {
        let err = f
            .store
            .decide_redemption(&f.child_id, &redeemed.redemption.id, decision, at(10, 14, 0))
            .await
            .unwrap_err();
        assert_eq!(
            rule(err),
            RuleViolation::RedemptionClosed {
                status: RedemptionStatus::Denied
            }
        );
    }
    assert_eq!(balance(&f).await, 50);
}

#[tokio::test]
async fn approval_keeps_the_coins_spent() {
    let f = fixture().await;
    f.store.set_balance(&f.child_id, 40).await.unwrap();
    let r = f.store.create_reward(&f.child_id, reward(25)).await.unwrap();
    let redeemed = f.store.redeem(&f.child_id, &r.id, at(10, 12, 0)).await.unwrap();

    let approved = f
        .store
        .decide_redemption(&f.child_id, &redeemed.redemption.id, Decision::Approve, at(10, 12, 5))
        .await
        .unwrap();
    assert_eq!(approved.redemption.status, "approved");
    assert_eq!(approved.coin_balance, 15);

    let pending = f
        .store
        .list_redemptions(&f.child_id, Some(RedemptionStatus::Pending))
        .await
        .unwrap();
    assert!(pending.is_empty());
    let all = f.store.list_redemptions(&f.child_id, None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].reward.name, "Ice cream");
}

#[tokio::test]
async fn redeem_requires_enough_coins_and_an_active_reward() {
    let f = fixture().await;
    f.store.set_balance(&f.child_id, 10).await.unwrap();
    let r = f.store.create_reward(&f.child_id, reward(30)).await.unwrap();

    let err = f
        .store
        .redeem(&f.child_id, &r.id, at(10, 12, 0))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::InsufficientCoins { shortfall: 20 });
    assert_eq!(balance(&f).await, 10);
    assert!(f.store.list_redemptions(&f.child_id, None).await.unwrap().is_empty());

    let mut inactive = reward(5);
    inactive.is_active = false;
    let off = f.store.create_reward(&f.child_id, inactive).await.unwrap();
    let err = f
        .store
        .redeem(&f.child_id, &off.id, at(10, 12, 0))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::RewardInactive);

    let active = f.store.list_rewards(&f.child_id, true).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn reward_with_pending_redemptions_cannot_be_deleted() {
    let f = fixture().await;
    f.store.set_balance(&f.child_id, 10).await.unwrap();
    let r = f.store.create_reward(&f.child_id, reward(10)).await.unwrap();
    let redeemed = f.store.redeem(&f.child_id, &r.id, at(10, 12, 0)).await.unwrap();

    let err = f.store.delete_reward(&f.child_id, &r.id).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    f.store
        .decide_redemption(&f.child_id, &redeemed.redemption.id, Decision::Approve, at(10, 13, 0))
        .await
        .unwrap();
    assert!(f.store.delete_reward(&f.child_id, &r.id).await.unwrap());
}

#[tokio::test]
async fn concurrent_completions_never_exceed_the_ceiling() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 1, 0, 10, &[]))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let store = f.store.clone();
        let child = f.child_id.clone();
        let habit = h.clone();
        tasks.push(tokio::spawn(async move {
            store.complete_habit(&child, &habit, at(10, 8, 0)).await
        }));
    }
    let mut ok = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(rule(e), RuleViolation::MaxCompletionsReached),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(balance(&f).await, 10);
}

#[tokio::test]
async fn streak_follows_consecutive_days() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 1, 0, 1, &[]))
        .await
        .unwrap();

    let d1 = f.store.complete_habit(&f.child_id, &h, at(10, 8, 0)).await.unwrap();
    assert_eq!(d1.current_streak, 1);
    let d2 = f.store.complete_habit(&f.child_id, &h, at(11, 8, 0)).await.unwrap();
    assert_eq!(d2.current_streak, 2);
    let d4 = f.store.complete_habit(&f.child_id, &h, at(13, 8, 0)).await.unwrap();
    assert_eq!(d4.current_streak, 1);
}

#[tokio::test]
async fn today_is_the_parents_local_day() {
    let f = fixture().await;
    f.store
        .set_timezone(&f.parent_id, "Pacific/Auckland")
        .await
        .unwrap();
    let tuesday_only = Frequency::Custom(BTreeSet::from([Weekday::Tue]));
    let h = f
        .store
        .create_habit(&f.child_id, habit(tuesday_only, 1, 0, 10, &[]))
        .await
        .unwrap();

    // Monday 12:00 UTC is already Tuesday 01:00 in Auckland
    let now = at(10, 12, 0);
    f.store.complete_habit(&f.child_id, &h, now).await.unwrap();

    // Tuesday 10:59 UTC is still Tuesday there; 11:00 UTC is Wednesday
    let err = f
        .store
        .complete_habit(&f.child_id, &h, now + Duration::hours(22) + Duration::minutes(59))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::MaxCompletionsReached);
    let err = f
        .store
        .complete_habit(&f.child_id, &h, now + Duration::hours(23))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::NotScheduledToday);
}

#[tokio::test]
async fn editing_steps_replaces_them_and_clears_their_progress() {
    let f = fixture().await;
    let h = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 1, 0, 5, &["A", "B"]))
        .await
        .unwrap();
    let old = step_ids(&f, &h).await;
    f.store
        .complete_step(&f.child_id, &h, &old[0], at(10, 8, 0))
        .await
        .unwrap();

    f.store
        .update_habit(&f.child_id, &h, habit(Frequency::Daily, 1, 0, 5, &["C", "D", "E"]))
        .await
        .unwrap();
    let state = f.store.habit_state(&f.child_id, &h, at(10, 8, 5)).await.unwrap();
    let names: Vec<_> = state.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["C", "D", "E"]);
    assert!(state.eligibility.completed_steps.is_empty());

    let err = f
        .store
        .complete_step(&f.child_id, &h, &old[1], at(10, 8, 6))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { entity: "step", .. }));
}

#[tokio::test]
async fn inactive_habits_cannot_be_completed() {
    let f = fixture().await;
    let mut draft = habit(Frequency::Daily, 1, 0, 5, &[]);
    draft.is_active = false;
    let h = f.store.create_habit(&f.child_id, draft).await.unwrap();

    let err = f
        .store
        .complete_habit(&f.child_id, &h, at(10, 8, 0))
        .await
        .unwrap_err();
    assert_eq!(rule(err), RuleViolation::HabitInactive);
    assert!(f.store.list_habits(&f.child_id, true).await.unwrap().is_empty());
    assert_eq!(f.store.list_habits(&f.child_id, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_definitions_are_rejected() {
    let f = fixture().await;
    let err = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Daily, 9, 0, 5, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Domain(_)));

    let err = f
        .store
        .create_habit(&f.child_id, habit(Frequency::Custom(BTreeSet::new()), 1, 0, 5, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Domain(_)));

    let err = f
        .store
        .create_child(&f.parent_id, "Too young", 4, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Domain(_)));

    let err = f.store.create_reward(&f.child_id, reward(0)).await.unwrap_err();
    assert!(matches!(err, StorageError::Domain(_)));
}

#[tokio::test]
async fn ledger_debits_never_go_below_zero() {
    let f = fixture().await;
    assert_eq!(f.store.credit_coins(&f.child_id, 12, "bonus").await.unwrap(), 12);
    assert_eq!(f.store.debit_coins(&f.child_id, 5, "fine").await.unwrap(), 7);
    assert_eq!(f.store.debit_coins(&f.child_id, 20, "fine").await.unwrap(), 0);
    assert_eq!(f.store.debit_coins(&f.child_id, 3, "fine").await.unwrap(), 0);
    assert_eq!(balance(&f).await, 0);
}

#[tokio::test]
async fn ledger_rejects_negative_credits() {
    let f = fixture().await;
    f.store.credit_coins(&f.child_id, 4, "bonus").await.unwrap();
    let err = f
        .store
        .credit_coins(&f.child_id, -10, "bonus")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));
    assert_eq!(balance(&f).await, 4);

    let err = f
        .store
        .credit_coins("no-such-child", 1, "bonus")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { entity: "child", .. }));
}
