use axum::{
    extract::{FromRequest, Request},
    Json,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// JSON body that has passed `validator` checks.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Largest quantity, unit price or discount accepted on a line.
fn max_line_value() -> Decimal {
    Decimal::new(1_000_000_000_000, 0)
}

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn scale(value: &Decimal) -> u32 {
    value.normalize().scale()
}

/// Quantities and unit prices: positive, at most four decimals.
pub fn validate_line_value(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(error("positive", "must be greater than zero"));
    }
    if *value > max_line_value() {
        return Err(error("too_large", "must not exceed 1000000000000"));
    }
    if scale(value) > 4 {
        return Err(error("scale", "must have at most 4 decimal places"));
    }
    Ok(())
}

/// Line discounts: zero or more, in currency units.
pub fn validate_discount(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(error("non_negative", "must not be negative"));
    }
    if *value > max_line_value() {
        return Err(error("too_large", "must not exceed 1000000000000"));
    }
    if scale(value) > 2 {
        return Err(error("scale", "must have at most 2 decimal places"));
    }
    Ok(())
}

/// Payment amounts: positive, in currency units.
pub fn validate_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(error("positive", "must be greater than zero"));
    }
    if scale(value) > 2 {
        return Err(error("scale", "must have at most 2 decimal places"));
    }
    Ok(())
}

pub fn validate_percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED || scale(value) > 4 {
        return Err(error(
            "tax_rate",
            "must be between 0 and 100 with at most 4 decimal places",
        ));
    }
    Ok(())
}

/// ISO 4217 style code: three ASCII letters.
pub fn validate_currency(value: &str) -> Result<(), ValidationError> {
    if value.len() != 3 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(error("currency", "must be a three-letter currency code"));
    }
    Ok(())
}

/// Series labels end up in display numbers; keep them short and printable.
pub fn validate_series(value: &str) -> Result<(), ValidationError> {
    if value.is_empty()
        || value.len() > 20
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(error(
            "series",
            "must be 1-20 characters of letters, digits, '-' or '_'",
        ));
    }
    Ok(())
}

pub fn validate_not_nil(value: &Uuid) -> Result<(), ValidationError> {
    if value.is_nil() {
        return Err(error("required", "is required"));
    }
    Ok(())
}
