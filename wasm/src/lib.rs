//! WebAssembly module for the POS back-office
//!
//! Provides client-side computation for:
//! - Days until expiry and alert levels
//! - Batch and expiry action quantity checks
//! - Reconciliation expected balance and difference

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::log_1(&"pos-backoffice wasm loaded".into());
}

fn parse_date(value: &str) -> Result<NaiveDate, JsValue> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| JsValue::from_str(&format!("Invalid date '{}': {}", value, e)))
}

fn parse_decimal(value: &str) -> Result<Decimal, JsValue> {
    Decimal::from_str(value.trim())
        .map_err(|e| JsValue::from_str(&format!("Invalid amount '{}': {}", value, e)))
}

/// Today's date in the browser's local time zone
fn browser_today() -> Result<NaiveDate, JsValue> {
    let now = js_sys::Date::new_0();
    NaiveDate::from_ymd_opt(
        now.get_full_year() as i32,
        now.get_month() + 1,
        now.get_date(),
    )
    .ok_or_else(|| JsValue::from_str("Browser returned an invalid date"))
}

fn resolve_today(today: Option<String>) -> Result<NaiveDate, JsValue> {
    match today {
        Some(value) => parse_date(&value),
        None => browser_today(),
    }
}

/// Days until `expiry_date` (YYYY-MM-DD); negative once expired.
/// `today` defaults to the browser's date.
#[wasm_bindgen]
pub fn days_until(expiry_date: &str, today: Option<String>) -> Result<i32, JsValue> {
    let days = days_until_expiry(parse_date(expiry_date)?, resolve_today(today)?);
    Ok(days.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

/// Alert level ("expired", "critical", "warning") or undefined outside the window
#[wasm_bindgen]
pub fn expiry_alert_level(
    expiry_date: &str,
    alert_days_before: i32,
    critical_days: i32,
    today: Option<String>,
) -> Result<Option<String>, JsValue> {
    let days = days_until_expiry(parse_date(expiry_date)?, resolve_today(today)?);
    Ok(alert_level(days, alert_days_before, critical_days).map(|level| level.as_str().to_string()))
}

/// Validate a batch form's quantities; returns the first problem or undefined
#[wasm_bindgen]
pub fn check_batch_quantities(quantity: i32, remaining_quantity: i32) -> Option<String> {
    validate_batch_quantity(quantity)
        .and_then(|_| validate_remaining_quantity(remaining_quantity, quantity))
        .err()
        .map(str::to_string)
}

/// Validate an expiry action before submitting it; returns the problem or undefined
#[wasm_bindgen]
pub fn check_action_quantity(
    batch_status: &str,
    remaining_quantity: i32,
    action_type: &str,
    quantity: i32,
) -> Result<Option<String>, JsValue> {
    let status = BatchStatus::from_str(batch_status).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let action =
        ExpiryActionType::from_str(action_type).map_err(|e| JsValue::from_str(&e.to_string()))?;

    Ok(apply_expiry_action(status, remaining_quantity, action, quantity)
        .err()
        .map(|e| e.to_string()))
}

/// Status a batch will have after the action, as a string
#[wasm_bindgen]
pub fn status_after_action(
    batch_status: &str,
    remaining_quantity: i32,
    action_type: &str,
    quantity: i32,
) -> Result<String, JsValue> {
    let status = BatchStatus::from_str(batch_status).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let action =
        ExpiryActionType::from_str(action_type).map_err(|e| JsValue::from_str(&e.to_string()))?;

    apply_expiry_action(status, remaining_quantity, action, quantity)
        .map(|outcome| outcome.status.as_str().to_string())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Net loss of an action (cost minus revenue) as a decimal string
#[wasm_bindgen]
pub fn action_net_loss(cost: &str, revenue: &str) -> Result<String, JsValue> {
    Ok(net_loss(parse_decimal(cost)?, parse_decimal(revenue)?).to_string())
}

/// Expected balance: opening plus the matched amounts (JSON array of decimal strings)
#[wasm_bindgen]
pub fn reconciliation_expected_balance(
    opening_balance: &str,
    match_amounts_json: &str,
) -> Result<String, JsValue> {
    let amounts: Vec<Decimal> = serde_json::from_str(match_amounts_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid amounts JSON: {}", e)))?;
    Ok(expected_balance(parse_decimal(opening_balance)?, amounts).to_string())
}

/// Closing minus expected balance; "0" while no closing balance is entered
#[wasm_bindgen]
pub fn reconciliation_difference(closing_balance: Option<String>, expected: &str) -> Result<String, JsValue> {
    let closing = match closing_balance.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(parse_decimal(value)?),
    };
    let difference = balance_difference(closing, parse_decimal(expected)?);
    if !difference.is_zero() {
        web_sys::console::warn_1(&format!("reconciliation is off by {}", difference).into());
    }
    Ok(difference.to_string())
}
