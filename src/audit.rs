use chrono::Local;

use crate::db::{self, DbPool};
use crate::models::{AuditEvent, LogLevel};
use crate::store::AuditSink;

/// Mirrors every event to `tracing` and keeps a copy in the `logs` table.
/// A failed insert is reported through `tracing` and otherwise ignored.
pub struct DbAudit {
    pool: DbPool,
    service: String,
}

impl DbAudit {
    pub fn new(pool: DbPool, service: impl Into<String>) -> Self {
        Self {
            pool,
            service: service.into(),
        }
    }

    fn persist(&self, event: &AuditEvent) -> Result<(), crate::errors::StoreError> {
        let conn = self.pool.get()?;
        db::insert_log(&conn, &self.service, event, &Local::now().to_rfc3339())
    }
}

fn emit(service: &str, event: &AuditEvent) {
    let data = &event.data;
    match event.level {
        LogLevel::Info => tracing::info!(service, %data, "{}", event.message),
        LogLevel::Warn => tracing::warn!(service, %data, "{}", event.message),
        LogLevel::Error => tracing::error!(service, %data, "{}", event.message),
    }
}

impl AuditSink for DbAudit {
    fn record(&self, event: AuditEvent) {
        emit(&self.service, &event);
        if let Err(err) = self.persist(&event) {
            tracing::error!(service = %self.service, error = %err, "failed to save log entry");
        }
    }
}
