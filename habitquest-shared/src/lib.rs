pub mod api;
pub mod auth;
pub mod domain;
pub mod eligibility;
pub mod jwt;
pub mod rules;
pub mod schedule;

pub use domain::*;
pub use eligibility::{Eligibility, evaluate};
pub use rules::RuleViolation;
pub use schedule::is_scheduled_on;
