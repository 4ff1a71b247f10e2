use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cost categories in the order every report lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Health,
    Housing,
    Sports,
    Education,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Food,
        Category::Health,
        Category::Housing,
        Category::Sports,
        Category::Education,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Health => "health",
            Category::Housing => "housing",
            Category::Sports => "sports",
            Category::Education => "education",
        }
    }

    /// Comma separated list used in validation messages.
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|category| category.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birthday: NaiveDate,
}

/// A cost that passed the ingestion guard but has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCost {
    pub description: String,
    pub category: Category,
    pub user_id: i64,
    pub amount: Decimal,
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostRecord {
    pub id: i64,
    pub description: String,
    pub category: Category,
    pub user_id: i64,
    pub amount: Decimal,
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl CostRecord {
    pub fn from_new(id: i64, cost: NewCost) -> Self {
        Self {
            id,
            description: cost.description,
            category: cost.category,
            user_id: cost.user_id,
            amount: cost.amount,
            day: cost.day,
            month: cost.month,
            year: cost.year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportPeriod {
    pub user_id: i64,
    pub year: i32,
    pub month: u32,
}

impl ReportPeriod {
    pub fn new(user_id: i64, year: i32, month: u32) -> Self {
        Self {
            user_id,
            year,
            month,
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {} {:04}-{:02}", self.user_id, self.year, self.month)
    }
}

/// One line of a category bucket. Amounts stay decimal until the HTTP view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub amount: Decimal,
    pub description: String,
    pub day: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBucket {
    pub category: Category,
    pub entries: Vec<ReportEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub user_id: i64,
    pub year: i32,
    pub month: u32,
    pub categories: Vec<CategoryBucket>,
}

impl Report {
    pub fn period(&self) -> ReportPeriod {
        ReportPeriod::new(self.user_id, self.year, self.month)
    }

    pub fn entry_count(&self) -> usize {
        self.categories.iter().map(|bucket| bucket.entries.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedReport {
    pub report: Report,
    pub computed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// HTTP request details attached to an audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub status_code: u16,
    pub response_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub level: LogLevel,
    pub message: String,
    pub request: Option<RequestInfo>,
    pub data: serde_json::Value,
}

impl AuditEvent {
    pub fn new(level: LogLevel, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            level,
            message: message.into(),
            request: None,
            data,
        }
    }

    pub fn info(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(LogLevel::Info, message, data)
    }

    pub fn warn(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(LogLevel::Warn, message, data)
    }

    pub fn error(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(LogLevel::Error, message, data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub service: String,
    pub method: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<i64>,
    pub data: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Developer {
    pub first_name: String,
    pub last_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!("Food".parse::<Category>(), Ok(Category::Food));
        assert_eq!("  EDUCATION ".parse::<Category>(), Ok(Category::Education));
        assert!("groceries".parse::<Category>().is_err());
    }

    #[test]
    fn category_names_follow_canonical_order() {
        assert_eq!(Category::names(), "food, health, housing, sports, education");
    }
}
