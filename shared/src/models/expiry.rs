//! Expiry tracker models

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::string_enum;

/// Default number of days before expiry at which a batch starts alerting
pub const DEFAULT_ALERT_DAYS_BEFORE: i32 = 30;

/// Upper bound for a batch's alert window
pub const MAX_ALERT_DAYS_BEFORE: i32 = 365;

/// Lifecycle status of a product expiry batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Expired,
    Disposed,
    Returned,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 4] = [
        BatchStatus::Active,
        BatchStatus::Expired,
        BatchStatus::Disposed,
        BatchStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Expired => "expired",
            BatchStatus::Disposed => "disposed",
            BatchStatus::Returned => "returned",
        }
    }

    /// Disposed and returned batches have left the shelf for good
    pub fn is_closed(&self) -> bool {
        matches!(self, BatchStatus::Disposed | BatchStatus::Returned)
    }

    /// Whether expiry actions may still be recorded against the batch
    pub fn accepts_actions(&self) -> bool {
        matches!(self, BatchStatus::Active | BatchStatus::Expired)
    }
}

string_enum!(BatchStatus, "batch status");

/// Approval state of a batch entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Draft,
    Submitted,
    Approved,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 3] = [
        ApprovalStatus::Draft,
        ApprovalStatus::Submitted,
        ApprovalStatus::Approved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::Submitted => "submitted",
            ApprovalStatus::Approved => "approved",
        }
    }

    /// Apply an approval step, returning the resulting status
    pub fn apply(self, step: ApprovalStep) -> Result<ApprovalStatus, String> {
        match (self, step) {
            (ApprovalStatus::Draft, ApprovalStep::Submit) => Ok(ApprovalStatus::Submitted),
            (ApprovalStatus::Submitted, ApprovalStep::Approve) => Ok(ApprovalStatus::Approved),
            (ApprovalStatus::Submitted, ApprovalStep::Reject) => Ok(ApprovalStatus::Draft),
            (from, step) => Err(format!(
                "cannot {} a batch that is {}",
                step.as_str(),
                from.as_str()
            )),
        }
    }

    /// Approved batches are locked against edits
    pub fn is_editable(&self) -> bool {
        !matches!(self, ApprovalStatus::Approved)
    }
}

string_enum!(ApprovalStatus, "approval status");

/// A step in the batch approval workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStep {
    Submit,
    Approve,
    Reject,
}

impl ApprovalStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStep::Submit => "submit",
            ApprovalStep::Approve => "approve",
            ApprovalStep::Reject => "reject",
        }
    }
}

/// Kind of action recorded against a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryActionType {
    Disposal,
    Return,
    Discount,
    Donation,
    Recall,
}

impl ExpiryActionType {
    pub const ALL: [ExpiryActionType; 5] = [
        ExpiryActionType::Disposal,
        ExpiryActionType::Return,
        ExpiryActionType::Discount,
        ExpiryActionType::Donation,
        ExpiryActionType::Recall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryActionType::Disposal => "disposal",
            ExpiryActionType::Return => "return",
            ExpiryActionType::Discount => "discount",
            ExpiryActionType::Donation => "donation",
            ExpiryActionType::Recall => "recall",
        }
    }

    /// Status a batch takes once an action of this type exhausts it
    pub fn exhausted_status(&self) -> BatchStatus {
        match self {
            ExpiryActionType::Disposal
            | ExpiryActionType::Discount
            | ExpiryActionType::Donation => BatchStatus::Disposed,
            ExpiryActionType::Return | ExpiryActionType::Recall => BatchStatus::Returned,
        }
    }

    pub fn requires_return_reference(&self) -> bool {
        matches!(self, ExpiryActionType::Return)
    }

    pub fn requires_disposal_method(&self) -> bool {
        matches!(self, ExpiryActionType::Disposal)
    }
}

string_enum!(ExpiryActionType, "expiry action type");

/// Urgency of an expiry alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Expired,
    Critical,
    Warning,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Expired => "expired",
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
        }
    }
}

/// Signed number of days from `today` until `expiry_date` (negative once passed)
pub fn days_until_expiry(expiry_date: NaiveDate, today: NaiveDate) -> i64 {
    (expiry_date - today).num_days()
}

/// Alert level for a batch, or `None` when it is outside its alert window
pub fn alert_level(days_until: i64, alert_days_before: i32, critical_days: i32) -> Option<AlertLevel> {
    if days_until < 0 {
        Some(AlertLevel::Expired)
    } else if days_until <= i64::from(critical_days.min(alert_days_before)) {
        Some(AlertLevel::Critical)
    } else if days_until <= i64::from(alert_days_before) {
        Some(AlertLevel::Warning)
    } else {
        None
    }
}

/// Outcome of applying an expiry action to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionOutcome {
    pub remaining_quantity: i32,
    pub status: BatchStatus,
}

/// Why an expiry action cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpiryActionError {
    #[error("Quantity affected must be greater than 0")]
    NonPositiveQuantity,

    #[error("Quantity affected ({requested}) exceeds remaining quantity ({remaining})")]
    ExceedsRemaining { requested: i32, remaining: i32 },

    #[error("Batch is {0} and no longer accepts actions")]
    BatchClosed(BatchStatus),
}

/// Compute the batch state after `quantity` units are handled by `action`
pub fn apply_expiry_action(
    status: BatchStatus,
    remaining_quantity: i32,
    action: ExpiryActionType,
    quantity: i32,
) -> Result<ActionOutcome, ExpiryActionError> {
    if !status.accepts_actions() {
        return Err(ExpiryActionError::BatchClosed(status));
    }
    if quantity <= 0 {
        return Err(ExpiryActionError::NonPositiveQuantity);
    }
    if quantity > remaining_quantity {
        return Err(ExpiryActionError::ExceedsRemaining {
            requested: quantity,
            remaining: remaining_quantity,
        });
    }

    let remaining_quantity = remaining_quantity - quantity;
    let status = if remaining_quantity == 0 {
        action.exhausted_status()
    } else {
        status
    };

    Ok(ActionOutcome {
        remaining_quantity,
        status,
    })
}

/// Value of stock still on hand for a batch
pub fn value_at_risk(remaining_quantity: i32, unit_cost: Decimal) -> Decimal {
    Decimal::from(remaining_quantity) * unit_cost
}

/// Net loss recorded by an action (cost minus any recovered revenue)
pub fn net_loss(cost: Decimal, revenue: Decimal) -> Decimal {
    cost - revenue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_until_expiry() {
        assert_eq!(days_until_expiry(date(2025, 1, 31), date(2025, 1, 1)), 30);
        assert_eq!(days_until_expiry(date(2025, 1, 1), date(2025, 1, 1)), 0);
        assert_eq!(days_until_expiry(date(2024, 12, 30), date(2025, 1, 1)), -2);
    }

    #[test]
    fn test_alert_levels() {
        assert_eq!(alert_level(-1, 30, 7), Some(AlertLevel::Expired));
        assert_eq!(alert_level(0, 30, 7), Some(AlertLevel::Critical));
        assert_eq!(alert_level(7, 30, 7), Some(AlertLevel::Critical));
        assert_eq!(alert_level(8, 30, 7), Some(AlertLevel::Warning));
        assert_eq!(alert_level(30, 30, 7), Some(AlertLevel::Warning));
        assert_eq!(alert_level(31, 30, 7), None);
    }

    #[test]
    fn test_alert_window_smaller_than_critical() {
        assert_eq!(alert_level(3, 3, 7), Some(AlertLevel::Critical));
        assert_eq!(alert_level(5, 3, 7), None);
    }

    #[test]
    fn test_disposal_exhausting_batch() {
        let outcome =
            apply_expiry_action(BatchStatus::Active, 10, ExpiryActionType::Disposal, 10).unwrap();
        assert_eq!(outcome.remaining_quantity, 0);
        assert_eq!(outcome.status, BatchStatus::Disposed);
    }

    #[test]
    fn test_return_exhausting_batch() {
        let outcome =
            apply_expiry_action(BatchStatus::Expired, 4, ExpiryActionType::Return, 4).unwrap();
        assert_eq!(outcome.status, BatchStatus::Returned);
    }

    #[test]
    fn test_partial_action_keeps_status() {
        let outcome =
            apply_expiry_action(BatchStatus::Active, 10, ExpiryActionType::Discount, 3).unwrap();
        assert_eq!(outcome.remaining_quantity, 7);
        assert_eq!(outcome.status, BatchStatus::Active);
    }

    #[test]
    fn test_action_exceeding_remaining() {
        let err =
            apply_expiry_action(BatchStatus::Active, 5, ExpiryActionType::Disposal, 6).unwrap_err();
        assert_eq!(
            err,
            ExpiryActionError::ExceedsRemaining {
                requested: 6,
                remaining: 5
            }
        );
    }

    #[test]
    fn test_action_on_closed_batch() {
        let err = apply_expiry_action(BatchStatus::Disposed, 5, ExpiryActionType::Recall, 1)
            .unwrap_err();
        assert_eq!(err, ExpiryActionError::BatchClosed(BatchStatus::Disposed));
    }

    #[test]
    fn test_approval_workflow() {
        let submitted = ApprovalStatus::Draft.apply(ApprovalStep::Submit).unwrap();
        assert_eq!(submitted, ApprovalStatus::Submitted);
        assert_eq!(
            submitted.apply(ApprovalStep::Reject).unwrap(),
            ApprovalStatus::Draft
        );
        assert_eq!(
            submitted.apply(ApprovalStep::Approve).unwrap(),
            ApprovalStatus::Approved
        );
        assert!(ApprovalStatus::Draft.apply(ApprovalStep::Approve).is_err());
        assert!(ApprovalStatus::Approved.apply(ApprovalStep::Reject).is_err());
        assert!(!ApprovalStatus::Approved.is_editable());
    }

    #[test]
    fn test_status_round_trip_from_db_strings() {
        assert_eq!("returned".parse::<BatchStatus>().unwrap(), BatchStatus::Returned);
        assert_eq!(
            ExpiryActionType::try_from("donation".to_string()).unwrap(),
            ExpiryActionType::Donation
        );
        assert!("thrown_away".parse::<ExpiryActionType>().is_err());
    }

    #[test]
    fn test_value_at_risk() {
        assert_eq!(value_at_risk(12, Decimal::new(250, 2)), Decimal::new(3000, 2));
        assert_eq!(net_loss(Decimal::from(30), Decimal::from(12)), Decimal::from(18));
    }
}
