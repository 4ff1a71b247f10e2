use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::costs::integer_value;
use crate::errors::{ServiceError, StoreError};
use crate::models::{AuditEvent, User};
use crate::store::{AuditSink, UserDirectory};

#[derive(Debug, Default, Deserialize)]
pub struct UserSubmission {
    pub id: Option<Value>,
    pub first_name: Option<Value>,
    pub last_name: Option<Value>,
    pub birthday: Option<Value>,
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_birthday(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}

fn required_name(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

pub fn validate_user(submission: &UserSubmission) -> Result<User, ServiceError> {
    let raw_id = submission
        .id
        .as_ref()
        .ok_or_else(|| ServiceError::validation(None, "User ID is required"))?;
    let subject = Some(raw_id.clone());

    let first_name = required_name(&submission.first_name).ok_or_else(|| {
        ServiceError::validation(subject.clone(), "First name is required and must be a string")
    })?;
    let last_name = required_name(&submission.last_name).ok_or_else(|| {
        ServiceError::validation(subject.clone(), "Last name is required and must be a string")
    })?;
    let birthday = match &submission.birthday {
        Some(Value::String(text)) if !text.trim().is_empty() => text.clone(),
        _ => return Err(ServiceError::validation(subject, "Birthday is required")),
    };

    let id = integer_value(raw_id)
        .ok_or_else(|| ServiceError::validation(subject, "User ID must be a number"))?;
    let birthday = parse_birthday(&birthday).ok_or_else(|| {
        ServiceError::validation(
            Some(json!(id)),
            "Invalid birthday format. Please provide a valid date.",
        )
    })?;

    Ok(User {
        id,
        first_name,
        last_name,
        birthday,
    })
}

pub fn add_user(
    users: &dyn UserDirectory,
    audit: &dyn AuditSink,
    submission: &UserSubmission,
) -> Result<User, ServiceError> {
    let user = validate_user(submission)?;
    match users.insert(&user) {
        Ok(()) => {
            audit.record(AuditEvent::info(
                "User added successfully",
                json!({ "userId": user.id }),
            ));
            Ok(user)
        }
        Err(StoreError::Conflict) => {
            audit.record(AuditEvent::warn(
                "User with this ID already exists",
                json!({ "userId": user.id }),
            ));
            Err(ServiceError::validation(
                Some(json!(user.id)),
                "A user with this ID already exists",
            ))
        }
        Err(err) => Err(err.into()),
    }
}
