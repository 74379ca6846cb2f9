//! Sync audit trail helpers.
//!
//! Every external sync writes an audit record. Writing the record returns a
//! typed result; background jobs that must not die on a full disk use the
//! best-effort variant, which logs the failure and moves on without masking
//! the primary outcome.

use tracing::warn;

use crate::error::DatabaseError;
use crate::model::SyncAuditRecord;
use crate::store::Store;

/// Build an OK record for a sync action.
pub fn sync_ok(
    service: &str,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
) -> SyncAuditRecord {
    SyncAuditRecord {
        service: service.to_string(),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        status: "OK".to_string(),
        message: None,
    }
}

/// Build an ERROR record for a sync action.
pub fn sync_error(
    service: &str,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    message: &str,
) -> SyncAuditRecord {
    SyncAuditRecord {
        service: service.to_string(),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        status: "ERROR".to_string(),
        message: Some(message.to_string()),
    }
}

/// Append an audit record, returning the write result to the caller.
pub async fn record(store: &dyn Store, entry: &SyncAuditRecord) -> Result<(), DatabaseError> {
    store.record_sync_audit(entry).await
}

/// Append an audit record from inside a job whose own outcome matters more
/// than the trail. A failed write is logged and swallowed.
pub async fn record_best_effort(store: &dyn Store, entry: SyncAuditRecord) {
    if let Err(e) = store.record_sync_audit(&entry).await {
        warn!(
            service = %entry.service,
            action = %entry.action,
            "Failed to write sync audit record: {e}"
        );
    }
}
