//! Field validation for expense and settings input.
//!
//! Every validator returns a [`FieldValidation`] rather than an error: callers
//! collect the messages and decide how to surface them. Text sanitization only
//! defuses markup characters and whitespace runs; it is not an HTML sanitizer.

use chrono::{Local, Months, NaiveDate};
use serde_json::Value;
use shared::{is_known_category, AmountInput, PayerId};
use thiserror::Error;

pub const MAX_DESCRIPTION_LENGTH: usize = 100;
pub const MAX_NAME_LENGTH: usize = 20;
pub const MIN_AMOUNT: f64 = 0.01;
pub const MAX_AMOUNT: f64 = 10_000_000.0;
const PAST_DATE_LIMIT_MONTHS: u32 = 100 * 12;
const FUTURE_DATE_LIMIT_MONTHS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Description is required")]
    EmptyDescription,
    #[error("Description must be at most {max} characters (got {actual})")]
    DescriptionTooLong { max: usize, actual: usize },
    #[error("Amount is required")]
    EmptyAmount,
    #[error("Amount must be a number: {0}")]
    InvalidAmountFormat(String),
    #[error("Amount must be a finite number")]
    NonFiniteAmount,
    #[error("Amount must be at least 1")]
    AmountTooSmall,
    #[error("Amount must not exceed 10,000,000")]
    AmountTooLarge,
    #[error("Date must use the YYYY-MM-DD format")]
    InvalidDateFormat,
    #[error("Date {0} does not exist")]
    NonexistentDate(String),
    #[error("Date must be within the last 100 years and at most 1 year ahead")]
    DateOutOfRange,
    #[error("Name is required")]
    EmptyName,
    #[error("Name must be at most {max} characters (got {actual})")]
    NameTooLong { max: usize, actual: usize },
    #[error("Category is required")]
    EmptyCategory,
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    #[error("Unknown payer id: {0}")]
    InvalidPayerId(String),
    #[error("Value is missing")]
    MissingValue,
}

/// Outcome of validating one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValidation<T> {
    pub is_valid: bool,
    pub error: Option<ValidationError>,
    /// Cleaned value; text validators fill this even when the value is rejected
    pub sanitized: Option<T>,
}

impl<T> FieldValidation<T> {
    fn valid(value: T) -> Self {
        Self {
            is_valid: true,
            error: None,
            sanitized: Some(value),
        }
    }

    fn invalid(error: ValidationError) -> Self {
        Self {
            is_valid: false,
            error: Some(error),
            sanitized: None,
        }
    }

    fn rejected_with(error: ValidationError, sanitized: T) -> Self {
        Self {
            is_valid: false,
            error: Some(error),
            sanitized: Some(sanitized),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// The accepted value, or the error. A result that is neither valid nor
    /// carries an error reports [`ValidationError::MissingValue`].
    pub fn into_result(self) -> Result<T, ValidationError> {
        match (self.is_valid, self.sanitized, self.error) {
            (_, _, Some(error)) => Err(error),
            (true, Some(value), None) => Ok(value),
            _ => Err(ValidationError::MissingValue),
        }
    }
}

/// Strip `<>"'&`, collapse whitespace runs to a single space and trim
pub fn sanitize_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_description(raw: &str) -> FieldValidation<String> {
    validate_text(
        raw,
        MAX_DESCRIPTION_LENGTH,
        ValidationError::EmptyDescription,
        |max, actual| ValidationError::DescriptionTooLong { max, actual },
    )
}

/// Display names of household members
pub fn validate_username(raw: &str) -> FieldValidation<String> {
    validate_text(
        raw,
        MAX_NAME_LENGTH,
        ValidationError::EmptyName,
        |max, actual| ValidationError::NameTooLong { max, actual },
    )
}

fn validate_text(
    raw: &str,
    max_length: usize,
    empty: ValidationError,
    too_long: impl Fn(usize, usize) -> ValidationError,
) -> FieldValidation<String> {
    let sanitized = sanitize_text(raw);
    let length = sanitized.chars().count();
    if length == 0 {
        FieldValidation::rejected_with(empty, sanitized)
    } else if length > max_length {
        FieldValidation::rejected_with(too_long(max_length, length), sanitized)
    } else {
        FieldValidation::valid(sanitized)
    }
}

/// Validate an amount and truncate it toward zero.
///
/// The range check runs on the value before truncation, so `10000000.5` is
/// rejected even though it would truncate into range.
pub fn validate_amount(input: &AmountInput) -> FieldValidation<i64> {
    let parsed = match input {
        AmountInput::Number(value) => Ok(*value),
        AmountInput::Text(text) => parse_amount_text(text),
    };
    match parsed.and_then(check_amount_range) {
        Ok(amount) => FieldValidation::valid(amount),
        Err(error) => FieldValidation::invalid(error),
    }
}

/// Same rules as [`validate_amount`] for an untyped JSON value
pub fn validate_amount_value(value: &Value) -> FieldValidation<i64> {
    match value {
        Value::Number(number) => match number.as_f64() {
            Some(amount) => validate_amount(&AmountInput::Number(amount)),
            None => FieldValidation::invalid(ValidationError::NonFiniteAmount),
        },
        Value::String(text) => validate_amount(&AmountInput::Text(text.clone())),
        Value::Null => FieldValidation::invalid(ValidationError::EmptyAmount),
        other => FieldValidation::invalid(ValidationError::InvalidAmountFormat(other.to_string())),
    }
}

/// Parse a numeric string, tolerating thousands separators and currency marks
pub fn parse_amount_text(text: &str) -> Result<f64, ValidationError> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | '¥' | '￥' | '円') && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(ValidationError::EmptyAmount);
    }

    cleaned
        .parse::<f64>()
        .map_err(|_| ValidationError::InvalidAmountFormat(text.trim().to_string()))
}

fn check_amount_range(amount: f64) -> Result<i64, ValidationError> {
    if !amount.is_finite() {
        return Err(ValidationError::NonFiniteAmount);
    }
    if amount < MIN_AMOUNT {
        return Err(ValidationError::AmountTooSmall);
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::AmountTooLarge);
    }
    let truncated = amount.trunc() as i64;
    if truncated < 1 {
        return Err(ValidationError::AmountTooSmall);
    }
    Ok(truncated)
}

/// Validate a `YYYY-MM-DD` date against `today`.
///
/// The string must survive a parse/format round trip unchanged, which rejects
/// dates such as `2024-02-30` instead of rolling them into March.
pub fn validate_date(raw: &str, today: NaiveDate) -> FieldValidation<NaiveDate> {
    if !has_iso_date_shape(raw) {
        return FieldValidation::invalid(ValidationError::InvalidDateFormat);
    }

    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) if date.format("%Y-%m-%d").to_string() == raw => date,
        _ => return FieldValidation::invalid(ValidationError::NonexistentDate(raw.to_string())),
    };

    let earliest = today
        .checked_sub_months(Months::new(PAST_DATE_LIMIT_MONTHS))
        .unwrap_or(NaiveDate::MIN);
    let latest = today
        .checked_add_months(Months::new(FUTURE_DATE_LIMIT_MONTHS))
        .unwrap_or(NaiveDate::MAX);

    if date < earliest || date > latest {
        return FieldValidation::invalid(ValidationError::DateOutOfRange);
    }

    FieldValidation::valid(date)
}

/// [`validate_date`] against the local calendar date
pub fn validate_date_today(raw: &str) -> FieldValidation<NaiveDate> {
    validate_date(raw, Local::now().date_naive())
}

fn has_iso_date_shape(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
}

/// Membership in the fixed category set; only surrounding whitespace is removed
pub fn validate_category(raw: &str) -> FieldValidation<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        FieldValidation::invalid(ValidationError::EmptyCategory)
    } else if is_known_category(trimmed) {
        FieldValidation::valid(trimmed.to_string())
    } else {
        FieldValidation::invalid(ValidationError::UnknownCategory(trimmed.to_string()))
    }
}

pub fn validate_payer_id(raw: &str) -> FieldValidation<PayerId> {
    match PayerId::parse(raw) {
        Some(payer) => FieldValidation::valid(payer),
        None => FieldValidation::invalid(ValidationError::InvalidPayerId(raw.trim().to_string())),
    }
}

/// The scalar fields of an expense after validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedExpenseFields {
    pub description: String,
    pub amount: i64,
    pub category: String,
    pub date: NaiveDate,
}

/// Validate description, amount, category and date together, collecting every problem
pub fn validate_expense_fields(
    description: &str,
    amount: FieldValidation<i64>,
    category: &str,
    date: &str,
    today: NaiveDate,
) -> Result<ValidatedExpenseFields, Vec<ValidationError>> {
    let description = validate_description(description).into_result();
    let amount = amount.into_result();
    let category = validate_category(category).into_result();
    let date = validate_date(date, today).into_result();

    match (description, amount, category, date) {
        (Ok(description), Ok(amount), Ok(category), Ok(date)) => Ok(ValidatedExpenseFields {
            description,
            amount,
            category,
            date,
        }),
        (description, amount, category, date) => {
            let mut errors = Vec::new();
            errors.extend(description.err());
            errors.extend(amount.err());
            errors.extend(category.err());
            errors.extend(date.err());
            Err(errors)
        }
    }
}
