//! Validation utilities for the POS back-office
//!
//! Each check returns a static message so callers can collect every failure
//! for a form before responding.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::MAX_ALERT_DAYS_BEFORE;

// ============================================================================
// Expiry Batch Validations
// ============================================================================

/// Expiry date must lie strictly after `today`
pub fn validate_expiry_in_future(expiry_date: NaiveDate, today: NaiveDate) -> Result<(), &'static str> {
    if expiry_date <= today {
        return Err("Expiry date must be in the future");
    }
    Ok(())
}

/// Manufacturing date must precede the expiry date and not lie in the future
pub fn validate_manufacturing_date(
    manufacturing_date: NaiveDate,
    expiry_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), &'static str> {
    if manufacturing_date >= expiry_date {
        return Err("Manufacturing date must be before the expiry date");
    }
    if manufacturing_date > today {
        return Err("Manufacturing date cannot be in the future");
    }
    Ok(())
}

/// Batch quantity must be positive
pub fn validate_batch_quantity(quantity: i32) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be greater than 0");
    }
    Ok(())
}

/// Remaining quantity must be within 0..=quantity
pub fn validate_remaining_quantity(remaining: i32, quantity: i32) -> Result<(), &'static str> {
    if remaining < 0 {
        return Err("Remaining quantity cannot be negative");
    }
    if remaining > quantity {
        return Err("Remaining quantity cannot exceed the batch quantity");
    }
    Ok(())
}

/// A batch that does not add stock must fit within the product's inventory count
pub fn validate_against_product_stock(quantity: i32, product_quantity: i32) -> Result<(), &'static str> {
    if quantity > product_quantity {
        return Err("Batch quantity cannot exceed the product's quantity in stock");
    }
    Ok(())
}

/// Money amounts that may be zero but never negative
pub fn validate_non_negative(amount: Decimal) -> Result<(), &'static str> {
    if amount < Decimal::ZERO {
        return Err("Amount cannot be negative");
    }
    Ok(())
}

/// Alert window must be within 0..=MAX_ALERT_DAYS_BEFORE
pub fn validate_alert_days(days: i32) -> Result<(), &'static str> {
    if !(0..=MAX_ALERT_DAYS_BEFORE).contains(&days) {
        return Err("Alert days must be between 0 and 365");
    }
    Ok(())
}

// ============================================================================
// Finance Validations
// ============================================================================

/// Reconciliation period must not end before it starts
pub fn validate_period(start: NaiveDate, end: NaiveDate) -> Result<(), &'static str> {
    if end < start {
        return Err("Period end must not be before period start");
    }
    Ok(())
}

/// Match amount must be positive
pub fn validate_match_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount <= Decimal::ZERO {
        return Err("Match amount must be greater than 0");
    }
    Ok(())
}

/// Confidence score is a percentage
pub fn validate_confidence_score(score: Decimal) -> Result<(), &'static str> {
    if score < Decimal::ZERO || score > Decimal::from(100) {
        return Err("Confidence score must be between 0 and 100");
    }
    Ok(())
}

/// Account numbers: 4-34 characters of digits, letters, spaces or dashes
pub fn validate_account_number(number: &str) -> Result<(), &'static str> {
    let compact: String = number.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if compact.len() < 4 || compact.len() > 34 {
        return Err("Account number must be 4 to 34 characters");
    }
    if !compact.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("Account number may only contain letters, digits, spaces and dashes");
    }
    Ok(())
}

/// Payment type codes are lowercase snake case, 2-50 characters
pub fn validate_payment_type_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 2 || code.len() > 50 {
        return Err("Payment type code must be 2 to 50 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("Payment type code must be lowercase letters, digits and underscores");
    }
    if code.starts_with('_') || code.ends_with('_') {
        return Err("Payment type code cannot start or end with an underscore");
    }
    Ok(())
}

/// Display colours are `#rrggbb`
pub fn validate_hex_color(color: &str) -> Result<(), &'static str> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err("Color must be a hex value like #1a2b3c");
    }
    Ok(())
}
