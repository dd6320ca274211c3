pub mod extract;
pub mod service;

pub use extract::{collect_labels, find_email, resolve_tier};
pub use service::{SyncOutcome, TierSyncService};
