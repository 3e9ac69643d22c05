use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn child_scoped(base: &str, child_id: &str, rest: &str) -> String {
    let path = if rest.is_empty() {
        format!("{}/children/{}", API_V1_PREFIX, enc(child_id))
    } else {
        format!("{}/children/{}/{}", API_V1_PREFIX, enc(child_id), rest)
    };
    base_join(base, &path)
}

pub fn version(base: &str) -> String {
    base_join(base, &format!("{}/version", API_V1_PREFIX))
}
pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn auth_logout(base: &str) -> String {
    base_join(base, &format!("{}/auth/logout", API_V1_PREFIX))
}
pub fn auth_parent_mode(base: &str) -> String {
    base_join(base, &format!("{}/auth/parent-mode", API_V1_PREFIX))
}
pub fn profile(base: &str) -> String {
    base_join(base, &format!("{}/profile", API_V1_PREFIX))
}
pub fn profile_pin(base: &str) -> String {
    base_join(base, &format!("{}/profile/pin", API_V1_PREFIX))
}
pub fn profile_timezone(base: &str) -> String {
    base_join(base, &format!("{}/profile/timezone", API_V1_PREFIX))
}
pub fn children(base: &str) -> String {
    base_join(base, &format!("{}/children", API_V1_PREFIX))
}
pub fn child(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "")
}
pub fn child_balance(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "balance")
}
pub fn child_session(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "session")
}
pub fn child_events(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "events")
}
pub fn child_habits(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "habits")
}
pub fn child_habit(base: &str, child_id: &str, habit_id: &str) -> String {
    child_scoped(base, child_id, &format!("habits/{}", enc(habit_id)))
}
pub fn habit_complete(base: &str, child_id: &str, habit_id: &str) -> String {
    child_scoped(base, child_id, &format!("habits/{}/complete", enc(habit_id)))
}
pub fn step_complete(base: &str, child_id: &str, habit_id: &str, step_id: &str) -> String {
    child_scoped(
        base,
        child_id,
        &format!("habits/{}/steps/{}/complete", enc(habit_id), enc(step_id)),
    )
}
pub fn step_uncomplete(base: &str, child_id: &str, habit_id: &str, step_id: &str) -> String {
    child_scoped(
        base,
        child_id,
        &format!("habits/{}/steps/{}/uncomplete", enc(habit_id), enc(step_id)),
    )
}
pub fn child_rewards(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "rewards")
}
pub fn child_reward(base: &str, child_id: &str, reward_id: &str) -> String {
    child_scoped(base, child_id, &format!("rewards/{}", enc(reward_id)))
}
pub fn reward_redeem(base: &str, child_id: &str, reward_id: &str) -> String {
    child_scoped(base, child_id, &format!("rewards/{}/redeem", enc(reward_id)))
}
pub fn child_redemptions(base: &str, child_id: &str) -> String {
    child_scoped(base, child_id, "redemptions")
}
pub fn redemption_approve(base: &str, child_id: &str, redemption_id: &str) -> String {
    child_scoped(
        base,
        child_id,
        &format!("redemptions/{}/approve", enc(redemption_id)),
    )
}
pub fn redemption_deny(base: &str, child_id: &str, redemption_id: &str) -> String {
    child_scoped(
        base,
        child_id,
        &format!("redemptions/{}/deny", enc(redemption_id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_relative_when_base_is_empty() {
        assert_eq!(children(""), "/api/v1/children");
        assert_eq!(
            step_complete("", "c1", "h-1", "s1"),
            "/api/v1/children/c1/habits/h%2D1/steps/s1/complete"
        );
    }

    #[test]
    fn base_slashes_are_normalized() {
        assert_eq!(
            child_events("http://localhost:5151/", "kid one"),
            "http://localhost:5151/api/v1/children/kid%20one/events"
        );
    }
}
