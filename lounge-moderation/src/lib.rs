pub mod service;

pub use service::{ModerationAction, ModerationService, REPORT_THRESHOLD, SUSPEND_DAYS};
