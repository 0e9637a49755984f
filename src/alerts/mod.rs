/// Alert model and dedup keys
pub mod alert;
/// Rule evaluation and alert lifecycle
pub mod alert_manager;

pub use alert::{canonicalize_labels, dedup_key, Alert, AlertSource, AlertStatus, Labels};
pub use alert_manager::{AlertManager, AlertSummary};
