use std::str::FromStr;
use std::sync::Arc;

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::clock::{is_closed, Clock};
use crate::errors::ServiceError;
use crate::models::{AuditEvent, Category, CostRecord, NewCost};
use crate::report::MIN_YEAR;
use crate::store::{AuditSink, CostLedger, UserDirectory};

/// Raw cost submission. Fields stay untyped so that malformed input turns
/// into a validation message instead of a body parsing failure.
#[derive(Debug, Default, Deserialize)]
pub struct CostSubmission {
    pub description: Option<Value>,
    pub category: Option<Value>,
    #[serde(rename = "userId", alias = "userid", alias = "user_id")]
    pub user_id: Option<Value>,
    #[serde(alias = "sum")]
    pub amount: Option<Value>,
    pub day: Option<Value>,
    pub month: Option<Value>,
    pub year: Option<Value>,
}

/// Reads an integer from a JSON number or a numeric string.
pub fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a decimal from a JSON number or a numeric string without passing
/// through binary floating point.
pub fn decimal_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// True for finite numbers, including ones too large for a `Decimal`.
fn is_finite_number(value: &Value) -> bool {
    match value {
        Value::Number(number) => number.as_f64().is_some_and(f64::is_finite),
        Value::String(text) => text.trim().parse::<f64>().is_ok_and(f64::is_finite),
        _ => false,
    }
}

/// Ingestion guard for the cost ledger. Nothing passes it into a closed
/// month, which is what keeps cached reports valid forever.
pub struct CostService {
    users: Arc<dyn UserDirectory>,
    ledger: Arc<dyn CostLedger>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl CostService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn CostLedger>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            ledger,
            audit,
            clock,
        }
    }

    pub fn submit(&self, submission: CostSubmission) -> Result<CostRecord, ServiceError> {
        let description = match &submission.description {
            Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
            _ => {
                return Err(ServiceError::validation(
                    None,
                    "Description is required and must be a string",
                ));
            }
        };

        let category = match &submission.category {
            Some(Value::String(text)) => text.parse::<Category>().map_err(|_| {
                ServiceError::validation(
                    None,
                    format!("Category must be one of: {}", Category::names()),
                )
            })?,
            _ => {
                return Err(ServiceError::validation(
                    None,
                    "Category is required and must be a string",
                ));
            }
        };

        let raw_user = submission
            .user_id
            .as_ref()
            .ok_or_else(|| ServiceError::validation(None, "User ID is required"))?;
        let user_id = integer_value(raw_user).ok_or_else(|| {
            ServiceError::validation(Some(raw_user.clone()), "User ID must be a number")
        })?;
        let subject = Some(json!(user_id));

        let raw_amount = submission
            .amount
            .as_ref()
            .ok_or_else(|| ServiceError::validation(subject.clone(), "Sum is required"))?;
        let amount = decimal_value(raw_amount).ok_or_else(|| {
            let message = if is_finite_number(raw_amount) {
                "Sum is out of range"
            } else {
                "Sum must be a number"
            };
            ServiceError::validation(subject.clone(), message)
        })?;
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ServiceError::validation(
                subject,
                "Sum must not be negative",
            ));
        }

        if !self.users.exists(user_id)? {
            self.audit.record(AuditEvent::warn(
                "User not found when adding cost",
                json!({ "userid": user_id }),
            ));
            return Err(ServiceError::not_found(
                user_id,
                "User not found. Cannot add cost for non-existent user.",
            ));
        }

        let today = self.clock.today();
        let day = date_field(&submission.day, today.day() as i64)
            .filter(|day| (1..=31).contains(day))
            .ok_or_else(|| {
                ServiceError::validation(subject.clone(), "Day must be a number between 1 and 31")
            })?;
        let month = date_field(&submission.month, today.month() as i64)
            .filter(|month| (1..=12).contains(month))
            .ok_or_else(|| {
                ServiceError::validation(
                    subject.clone(),
                    "Month must be a number between 1 and 12",
                )
            })?;
        let year = date_field(&submission.year, today.year() as i64)
            .filter(|year| (MIN_YEAR as i64..=i32::MAX as i64).contains(year))
            .ok_or_else(|| {
                ServiceError::validation(
                    subject.clone(),
                    "Year must be a valid year (1900 or later)",
                )
            })?;
        let (day, month, year) = (day as u32, month as u32, year as i32);

        // Month granularity: earlier days of the current month are accepted.
        if is_closed(year, month, today) {
            self.audit.record(AuditEvent::warn(
                "Attempt to add cost with past date",
                json!({ "userid": user_id, "year": year, "month": month }),
            ));
            return Err(ServiceError::validation(
                subject,
                "Cannot add costs with dates in the past",
            ));
        }

        let record = self.ledger.insert(NewCost {
            description,
            category,
            user_id,
            amount,
            day,
            month,
            year,
        })?;

        self.audit.record(AuditEvent::info(
            "Cost added successfully",
            json!({
                "userid": record.user_id,
                "category": record.category.as_str(),
                "sum": record.amount.to_string(),
            }),
        ));
        Ok(record)
    }
}

/// Explicit date component, or today's when absent. `None` means unparsable.
fn date_field(value: &Option<Value>, default: i64) -> Option<i64> {
    match value {
        Some(value) => integer_value(value),
        None => Some(default),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{ReportPeriod, User};
    use crate::store::memory::{MemoryAudit, MemoryLedger, MemoryUsers};

    const USER: i64 = 123123;

    fn service() -> (CostService, Arc<MemoryLedger>) {
        let users = Arc::new(MemoryUsers::with(vec![User {
            id: USER,
            first_name: "mosh".into(),
            last_name: "israeli".into(),
            birthday: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        }]));
        let ledger = Arc::new(MemoryLedger::default());
        let clock = Arc::new(FixedClock(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()));
        let service = CostService::new(
            users,
            ledger.clone(),
            Arc::new(MemoryAudit::default()),
            clock,
        );
        (service, ledger)
    }

    fn submission(body: Value) -> CostSubmission {
        serde_json::from_value(body).unwrap()
    }

    fn message(err: ServiceError) -> String {
        match err {
            ServiceError::Validation { message, .. } => message,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn undated_cost_is_stored_for_today_with_normalized_category() {
        let (service, ledger) = service();
        let record = service
            .submit(submission(json!({
                "description": " Lunch ",
                "category": "Food",
                "userId": USER,
                "amount": 25.50,
            })))
            .unwrap();

        assert_eq!(record.description, "Lunch");
        assert_eq!(record.category, Category::Food);
        assert_eq!(record.amount, Decimal::from_str("25.5").unwrap());
        assert_eq!((record.day, record.month, record.year), (18, 10, 2026));
        assert_eq!(ledger.query(ReportPeriod::new(USER, 2026, 10)).unwrap().len(), 1);
    }

    #[test]
    fn legacy_field_names_and_string_numbers_are_accepted() {
        let (service, _) = service();
        let record = service
            .submit(submission(json!({
                "description": "Physio",
                "category": "HEALTH",
                "userid": "123123",
                "sum": "80.10",
                "day": "2",
                "month": 12,
                "year": 2026,
            })))
            .unwrap();
        assert_eq!(record.amount, Decimal::from_str("80.10").unwrap());
        assert_eq!((record.day, record.month, record.year), (2, 12, 2026));
    }

    #[test]
    fn earlier_day_of_current_month_is_accepted() {
        let (service, _) = service();
        let record = service
            .submit(submission(json!({
                "description": "Rent",
                "category": "housing",
                "userId": USER,
                "amount": 1000,
                "day": 1,
            })))
            .unwrap();
        assert_eq!(record.day, 1);
    }

    #[test]
    fn past_periods_are_rejected_for_every_field_combination() {
        let (service, ledger) = service();
        let past_dates = [
            json!({ "month": 9 }),
            json!({ "year": 2025 }),
            json!({ "day": 30, "month": 9 }),
            json!({ "day": 18, "year": 2025 }),
            json!({ "month": 10, "year": 2025 }),
            json!({ "day": 1, "month": 12, "year": 2025 }),
            json!({ "month": 1, "year": 1900 }),
        ];
        for date in past_dates {
            let mut body = json!({
                "description": "Old",
                "category": "food",
                "userId": USER,
                "amount": 1,
            });
            for (key, value) in date.as_object().unwrap() {
                body[key] = value.clone();
            }
            let err = service.submit(submission(body)).unwrap_err();
            assert_eq!(message(err), "Cannot add costs with dates in the past");
        }
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn malformed_fields_are_validation_errors() {
        let (service, _) = service();
        let cases = [
            (json!({ "category": "food", "userId": USER, "amount": 1 }), "Description is required and must be a string"),
            (json!({ "description": 5, "category": "food", "userId": USER, "amount": 1 }), "Description is required and must be a string"),
            (json!({ "description": "x", "userId": USER, "amount": 1 }), "Category is required and must be a string"),
            (json!({ "description": "x", "category": "toys", "userId": USER, "amount": 1 }), "Category must be one of: food, health, housing, sports, education"),
            (json!({ "description": "x", "category": "food", "amount": 1 }), "User ID is required"),
            (json!({ "description": "x", "category": "food", "userId": "abc", "amount": 1 }), "User ID must be a number"),
            (json!({ "description": "x", "category": "food", "userId": USER }), "Sum is required"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": "lots" }), "Sum must be a number"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": -3 }), "Sum must not be negative"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": 1e30 }), "Sum is out of range"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": "1e30" }), "Sum is out of range"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": "NaN" }), "Sum must be a number"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": 1, "day": 32 }), "Day must be a number between 1 and 31"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": 1, "month": 13 }), "Month must be a number between 1 and 12"),
            (json!({ "description": "x", "category": "food", "userId": USER, "amount": 1, "year": 1899 }), "Year must be a valid year (1900 or later)"),
        ];
        for (body, expected) in cases {
            let err = service.submit(submission(body)).unwrap_err();
            assert_eq!(message(err), expected);
        }
    }

    #[test]
    fn unknown_user_is_not_found() {
        let (service, ledger) = service();
        let err = service
            .submit(submission(json!({
                "description": "x",
                "category": "food",
                "userId": 999999,
                "amount": 1,
            })))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
        assert_eq!(err.subject(), json!(999999));
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn decimal_parsing_avoids_float_drift() {
        assert_eq!(decimal_value(&json!(0.1)), Decimal::from_str("0.1").ok());
        assert_eq!(decimal_value(&json!("19.99")), Decimal::from_str("19.99").ok());
        assert_eq!(decimal_value(&json!(true)), None);
        assert_eq!(integer_value(&json!(" 42 ")), Some(42));
        assert_eq!(integer_value(&json!(4.5)), None);
    }
}
