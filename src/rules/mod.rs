/// Alert rules and condition evaluation
pub mod alert_rule;
pub mod condition;

pub use alert_rule::{AlertRule, DEFAULT_COOLDOWN};
pub use condition::{Condition, Operator};
