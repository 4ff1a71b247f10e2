use rust_decimal::Decimal;

use crate::errors::StoreError;
use crate::models::{AuditEvent, CachedReport, CostRecord, LogEntry, NewCost, Report, ReportPeriod, User};

pub trait UserDirectory: Send + Sync {
    fn exists(&self, id: i64) -> Result<bool, StoreError>;
    fn find(&self, id: i64) -> Result<Option<User>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when the id is taken.
    fn insert(&self, user: &User) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<User>, StoreError>;
}

/// Append-only cost storage.
pub trait CostLedger: Send + Sync {
    fn insert(&self, cost: NewCost) -> Result<CostRecord, StoreError>;
    /// Records of one period, in insertion order.
    fn query(&self, period: ReportPeriod) -> Result<Vec<CostRecord>, StoreError>;
    fn total_for_user(&self, user_id: i64) -> Result<Decimal, StoreError>;
}

/// Write-once storage of reports for closed periods.
pub trait ReportCache: Send + Sync {
    fn find(&self, period: ReportPeriod) -> Result<Option<CachedReport>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when the period is already cached.
    fn insert(&self, report: &Report) -> Result<(), StoreError>;
}

/// Fire-and-forget event emission. Implementations must not panic or block
/// the caller on their own failures.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

pub trait LogStore: Send + Sync {
    fn list(&self) -> Result<Vec<LogEntry>, StoreError>;
}

#[cfg(test)]
pub mod memory {
    //! In-memory stores for exercising the core without SQLite.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Local;
    use rust_decimal::Decimal;

    use super::*;

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Corrupt("lock poisoned".into())
    }

    #[derive(Default)]
    pub struct MemoryUsers {
        users: Mutex<Vec<User>>,
    }

    impl MemoryUsers {
        pub fn with(users: Vec<User>) -> Self {
            Self {
                users: Mutex::new(users),
            }
        }
    }

    impl UserDirectory for MemoryUsers {
        fn exists(&self, id: i64) -> Result<bool, StoreError> {
            Ok(self.find(id)?.is_some())
        }

        fn find(&self, id: i64) -> Result<Option<User>, StoreError> {
            let users = self.users.lock().map_err(poisoned)?;
            Ok(users.iter().find(|user| user.id == id).cloned())
        }

        fn insert(&self, user: &User) -> Result<(), StoreError> {
            let mut users = self.users.lock().map_err(poisoned)?;
            if users.iter().any(|existing| existing.id == user.id) {
                return Err(StoreError::Conflict);
            }
            users.push(user.clone());
            Ok(())
        }

        fn list(&self) -> Result<Vec<User>, StoreError> {
            Ok(self.users.lock().map_err(poisoned)?.clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryLedger {
        records: Mutex<Vec<CostRecord>>,
        pub queries: AtomicUsize,
    }

    impl MemoryLedger {
        pub fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.records.lock().map(|records| records.len()).unwrap_or(0)
        }
    }

    impl CostLedger for MemoryLedger {
        fn insert(&self, cost: NewCost) -> Result<CostRecord, StoreError> {
            let mut records = self.records.lock().map_err(poisoned)?;
            let record = CostRecord::from_new(records.len() as i64 + 1, cost);
            records.push(record.clone());
            Ok(record)
        }

        fn query(&self, period: ReportPeriod) -> Result<Vec<CostRecord>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let records = self.records.lock().map_err(poisoned)?;
            Ok(records
                .iter()
                .filter(|record| {
                    record.user_id == period.user_id
                        && record.year == period.year
                        && record.month == period.month
                })
                .cloned()
                .collect())
        }

        fn total_for_user(&self, user_id: i64) -> Result<Decimal, StoreError> {
            let records = self.records.lock().map_err(poisoned)?;
            Ok(records
                .iter()
                .filter(|record| record.user_id == user_id)
                .map(|record| record.amount)
                .sum())
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub enum CacheMode {
        #[default]
        Normal,
        /// Every write fails with a non-duplicate error.
        FailWrites,
        /// Lookups miss and every write finds the period already taken.
        LoseRaces,
        /// Lookups find a row that cannot be decoded.
        Unreadable,
    }

    /// Cache whose failure behaviour is chosen up front.
    #[derive(Default)]
    pub struct MemoryCache {
        reports: Mutex<HashMap<ReportPeriod, CachedReport>>,
        pub inserts: AtomicUsize,
        pub mode: CacheMode,
    }

    impl MemoryCache {
        pub fn with_mode(mode: CacheMode) -> Self {
            Self {
                mode,
                ..Self::default()
            }
        }

        pub fn len(&self) -> usize {
            self.reports.lock().map(|reports| reports.len()).unwrap_or(0)
        }

        pub fn insert_attempts(&self) -> usize {
            self.inserts.load(Ordering::SeqCst)
        }
    }

    impl ReportCache for MemoryCache {
        fn find(&self, period: ReportPeriod) -> Result<Option<CachedReport>, StoreError> {
            match self.mode {
                CacheMode::LoseRaces => return Ok(None),
                CacheMode::Unreadable => {
                    return Err(StoreError::Corrupt(format!("cached report for {period}")));
                }
                CacheMode::Normal | CacheMode::FailWrites => {}
            }
            let reports = self.reports.lock().map_err(poisoned)?;
            Ok(reports.get(&period).cloned())
        }

        fn insert(&self, report: &Report) -> Result<(), StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                CacheMode::FailWrites => return Err(StoreError::Corrupt("cache offline".into())),
                CacheMode::LoseRaces => return Err(StoreError::Conflict),
                CacheMode::Normal | CacheMode::Unreadable => {}
            }
            let mut reports = self.reports.lock().map_err(poisoned)?;
            if reports.contains_key(&report.period()) {
                return Err(StoreError::Conflict);
            }
            reports.insert(
                report.period(),
                CachedReport {
                    report: report.clone(),
                    computed_at: Local::now().to_rfc3339(),
                },
            );
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemoryAudit {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl MemoryAudit {
        pub fn messages(&self) -> Vec<String> {
            self.events
                .lock()
                .map(|events| events.iter().map(|event| event.message.clone()).collect())
                .unwrap_or_default()
        }
    }

    impl AuditSink for MemoryAudit {
        fn record(&self, event: AuditEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }
}
