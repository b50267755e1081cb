//! Id generation helpers for agentflow entities.
//!
//! Tasks use the store's rowid; everything generated here is either a uuid
//! (chains, messages, conflicts) or the `{group}-{unix_seconds}` scheme used
//! for workers that register without an explicit id.

use uuid::Uuid;

/// Default worker id: `{group}-{unix_seconds}`.
pub fn generate_worker_id(group: &str) -> String {
    format!("{}-{}", group, chrono::Utc::now().timestamp())
}

/// Fresh chain id.
pub fn generate_chain_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh message uuid for a chain root or mapping row.
pub fn generate_message_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh conflict record id.
pub fn generate_conflict_id() -> String {
    Uuid::new_v4().to_string()
}
