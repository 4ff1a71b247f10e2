//! Monthly report computation and the write-once cache in front of it.
//!
//! Costs can only be added to the current or a future month, so once a month
//! is over its report can no longer change. Reports for such closed months are
//! computed once, stored, and served from storage from then on. Reports for
//! open months are always computed from the ledger.

use std::sync::Arc;

use serde_json::json;

use crate::clock::{is_closed, Clock};
use crate::errors::{ServiceError, StoreError};
use crate::models::{AuditEvent, Category, CategoryBucket, CostRecord, Report, ReportEntry, ReportPeriod};
use crate::store::{AuditSink, CostLedger, ReportCache, UserDirectory};

pub const MIN_YEAR: i32 = 1900;

/// Splits the records of one period into one bucket per category, in
/// canonical category order. Entries keep the order of `records`.
pub fn group_by_category(records: &[CostRecord]) -> Vec<CategoryBucket> {
    Category::ALL
        .into_iter()
        .map(|category| CategoryBucket {
            category,
            entries: records
                .iter()
                .filter(|record| record.category == category)
                .map(|record| ReportEntry {
                    amount: record.amount,
                    description: record.description.clone(),
                    day: record.day,
                })
                .collect(),
        })
        .collect()
}

pub fn build_report(period: ReportPeriod, records: &[CostRecord]) -> Report {
    Report {
        user_id: period.user_id,
        year: period.year,
        month: period.month,
        categories: group_by_category(records),
    }
}

/// Outcome of trying to store a freshly computed report.
#[derive(Debug)]
enum CacheWrite {
    Stored,
    /// Another request cached the same period first.
    AlreadyCached,
    Failed(StoreError),
}

pub struct ReportResolver {
    users: Arc<dyn UserDirectory>,
    ledger: Arc<dyn CostLedger>,
    cache: Arc<dyn ReportCache>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ReportResolver {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn CostLedger>,
        cache: Arc<dyn ReportCache>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            ledger,
            cache,
            audit,
            clock,
        }
    }

    pub fn resolve(&self, user_id: i64, year: i32, month: u32) -> Result<Report, ServiceError> {
        if year < MIN_YEAR {
            return Err(ServiceError::validation(
                Some(json!(user_id)),
                "Year must be a valid year",
            ));
        }
        if !(1..=12).contains(&month) {
            return Err(ServiceError::validation(
                Some(json!(user_id)),
                "Month must be between 1 and 12",
            ));
        }
        if !self.users.exists(user_id)? {
            self.audit.record(AuditEvent::warn(
                "User not found when getting report",
                json!({ "userid": user_id }),
            ));
            return Err(ServiceError::not_found(user_id, "User not found"));
        }

        let period = ReportPeriod::new(user_id, year, month);
        let closed = is_closed(year, month, self.clock.today());

        if closed {
            match self.cache.find(period) {
                Ok(Some(cached)) => {
                    self.audit.record(AuditEvent::info(
                        "Returning cached report",
                        json!({
                            "userid": user_id,
                            "year": year,
                            "month": month,
                            "computed_at": cached.computed_at,
                        }),
                    ));
                    return Ok(cached.report);
                }
                Ok(None) => {}
                // An undecodable row is treated as a miss; the ledger still answers.
                Err(StoreError::Corrupt(detail)) => self.audit.record(AuditEvent::warn(
                    "Cached report unreadable, recomputing",
                    json!({
                        "userid": user_id,
                        "year": year,
                        "month": month,
                        "error": detail,
                    }),
                )),
                Err(err) => return Err(err.into()),
            }
        }

        let records = self.ledger.query(period)?;
        let report = build_report(period, &records);

        if closed {
            match self.store(&report) {
                CacheWrite::Stored => self.audit.record(AuditEvent::info(
                    "Report cached for past month",
                    period_data(period),
                )),
                CacheWrite::AlreadyCached => self.audit.record(AuditEvent::info(
                    "Report already cached by a concurrent request",
                    period_data(period),
                )),
                CacheWrite::Failed(err) => self.audit.record(AuditEvent::warn(
                    "Could not cache report",
                    json!({
                        "userid": user_id,
                        "year": year,
                        "month": month,
                        "error": err.to_string(),
                    }),
                )),
            }
        }

        self.audit.record(AuditEvent::info(
            "Report generated successfully",
            json!({
                "userid": user_id,
                "year": year,
                "month": month,
                "entries": report.entry_count(),
                "closed": closed,
            }),
        ));
        Ok(report)
    }

    fn store(&self, report: &Report) -> CacheWrite {
        match self.cache.insert(report) {
            Ok(()) => CacheWrite::Stored,
            Err(StoreError::Conflict) => CacheWrite::AlreadyCached,
            Err(err) => CacheWrite::Failed(err),
        }
    }
}

fn period_data(period: ReportPeriod) -> serde_json::Value {
    json!({
        "userid": period.user_id,
        "year": period.year,
        "month": period.month,
    })
}
