//! Expiry tracker tests
//!
//! Tests for batch expiry handling including:
//! - Batch form validation
//! - Expiry action quantity accounting and status changes
//! - Alert level classification

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    alert_level, apply_expiry_action, days_until_expiry, validate_expiry_in_future,
    validate_remaining_quantity, value_at_risk, AlertLevel, ApprovalStatus, ApprovalStep,
    BatchStatus, ExpiryActionError, ExpiryActionType,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// A batch that expired yesterday cannot be recorded
    #[test]
    fn test_past_expiry_rejected() {
        let today = date(2025, 6, 1);
        assert_eq!(
            validate_expiry_in_future(date(2025, 5, 31), today),
            Err("Expiry date must be in the future")
        );
    }

    /// Handling more than what is left is refused
    #[test]
    fn test_quantity_above_remaining_rejected() {
        let result = apply_expiry_action(BatchStatus::Active, 4, ExpiryActionType::Disposal, 5);
        assert_eq!(
            result,
            Err(ExpiryActionError::ExceedsRemaining {
                requested: 5,
                remaining: 4
            })
        );
    }

    /// Disposal that empties a batch closes it as disposed
    #[test]
    fn test_exhausting_disposal_marks_disposed() {
        let outcome =
            apply_expiry_action(BatchStatus::Active, 12, ExpiryActionType::Disposal, 12).unwrap();
        assert_eq!(outcome.remaining_quantity, 0);
        assert_eq!(outcome.status, BatchStatus::Disposed);
    }

    /// Return and recall close the batch as returned
    #[test]
    fn test_exhausting_return_marks_returned() {
        for action in [ExpiryActionType::Return, ExpiryActionType::Recall] {
            let outcome = apply_expiry_action(BatchStatus::Expired, 3, action, 3).unwrap();
            assert_eq!(outcome.status, BatchStatus::Returned);
        }
    }

    /// Discount and donation count as disposal
    #[test]
    fn test_discount_and_donation_mark_disposed() {
        for action in [ExpiryActionType::Discount, ExpiryActionType::Donation] {
            let outcome = apply_expiry_action(BatchStatus::Active, 1, action, 1).unwrap();
            assert_eq!(outcome.status, BatchStatus::Disposed);
        }
    }

    /// Partial handling keeps the batch open
    #[test]
    fn test_partial_action_keeps_status() {
        let outcome =
            apply_expiry_action(BatchStatus::Expired, 10, ExpiryActionType::Discount, 4).unwrap();
        assert_eq!(outcome.remaining_quantity, 6);
        assert_eq!(outcome.status, BatchStatus::Expired);
    }

    /// Closed batches take no further actions
    #[test]
    fn test_closed_batch_rejects_actions() {
        for status in [BatchStatus::Disposed, BatchStatus::Returned] {
            assert_eq!(
                apply_expiry_action(status, 5, ExpiryActionType::Disposal, 1),
                Err(ExpiryActionError::BatchClosed(status))
            );
        }
    }

    /// Approval workflow: draft -> submitted -> approved, reject returns to draft
    #[test]
    fn test_approval_workflow() {
        let submitted = ApprovalStatus::Draft.apply(ApprovalStep::Submit).unwrap();
        assert_eq!(submitted, ApprovalStatus::Submitted);
        assert_eq!(
            submitted.apply(ApprovalStep::Reject).unwrap(),
            ApprovalStatus::Draft
        );
        let approved = submitted.apply(ApprovalStep::Approve).unwrap();
        assert_eq!(approved, ApprovalStatus::Approved);
        assert!(!approved.is_editable());

        assert!(ApprovalStatus::Draft.apply(ApprovalStep::Approve).is_err());
        assert!(approved.apply(ApprovalStep::Submit).is_err());
    }

    /// Stored strings round into the enums the rows use
    #[test]
    fn test_status_strings() {
        assert_eq!("returned".parse::<BatchStatus>().unwrap(), BatchStatus::Returned);
        assert_eq!(ExpiryActionType::Recall.to_string(), "recall");
        assert!("lost".parse::<ExpiryActionType>().is_err());
    }

    /// Value at risk is remaining stock at cost
    #[test]
    fn test_value_at_risk() {
        assert_eq!(value_at_risk(8, Decimal::new(1250, 2)), Decimal::new(10000, 2));
    }

    #[test]
    fn test_alert_for_expired_batch() {
        let days = days_until_expiry(date(2025, 5, 28), date(2025, 6, 1));
        assert_eq!(days, -4);
        assert_eq!(alert_level(days, 30, 7), Some(AlertLevel::Expired));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn action_strategy() -> impl Strategy<Value = ExpiryActionType> {
        prop_oneof![
            Just(ExpiryActionType::Disposal),
            Just(ExpiryActionType::Return),
            Just(ExpiryActionType::Discount),
            Just(ExpiryActionType::Donation),
            Just(ExpiryActionType::Recall),
        ]
    }

    fn open_status_strategy() -> impl Strategy<Value = BatchStatus> {
        prop_oneof![Just(BatchStatus::Active), Just(BatchStatus::Expired)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Remaining quantity never goes negative and drops by exactly the handled amount
        #[test]
        fn prop_action_conserves_quantity(
            status in open_status_strategy(),
            remaining in 0i32..10_000,
            action in action_strategy(),
            quantity in -10i32..10_000,
        ) {
            match apply_expiry_action(status, remaining, action, quantity) {
                Ok(outcome) => {
                    prop_assert!(quantity > 0 && quantity <= remaining);
                    prop_assert_eq!(outcome.remaining_quantity, remaining - quantity);
                    prop_assert!(validate_remaining_quantity(outcome.remaining_quantity, remaining).is_ok());
                }
                Err(_) => prop_assert!(quantity <= 0 || quantity > remaining),
            }
        }

        /// A batch closes exactly when its stock runs out
        #[test]
        fn prop_batch_closes_only_when_exhausted(
            remaining in 1i32..1_000,
            action in action_strategy(),
            take in 1i32..1_000,
        ) {
            let quantity = take.min(remaining);
            let outcome = apply_expiry_action(BatchStatus::Active, remaining, action, quantity).unwrap();
            prop_assert_eq!(outcome.status.is_closed(), quantity == remaining);
        }

        /// Applying actions one at a time can never take more than the batch held
        #[test]
        fn prop_sequential_actions_never_overdraw(
            quantity in 1i32..500,
            requests in prop::collection::vec(1i32..100, 1..20),
        ) {
            let mut status = BatchStatus::Active;
            let mut remaining = quantity;
            let mut handled = 0;
            for request in requests {
                if let Ok(outcome) = apply_expiry_action(status, remaining, ExpiryActionType::Discount, request) {
                    handled += request;
                    remaining = outcome.remaining_quantity;
                    status = outcome.status;
                }
            }
            prop_assert!(handled <= quantity);
            prop_assert_eq!(handled + remaining, quantity);
        }

        /// Alert level follows the signed day count
        #[test]
        fn prop_alert_level_thresholds(
            offset in -60i64..400,
            alert_days in 0i32..=365,
            critical_days in 0i32..30,
        ) {
            let today = date(2025, 6, 1);
            let expiry = today + Duration::days(offset);
            let days = days_until_expiry(expiry, today);
            prop_assert_eq!(days, offset);

            match alert_level(days, alert_days, critical_days) {
                Some(AlertLevel::Expired) => prop_assert!(days < 0),
                Some(AlertLevel::Critical) => {
                    prop_assert!(days >= 0 && days <= i64::from(critical_days.min(alert_days)))
                }
                Some(AlertLevel::Warning) => {
                    prop_assert!(days > i64::from(critical_days) && days <= i64::from(alert_days))
                }
                None => prop_assert!(days > i64::from(alert_days)),
            }
        }

        /// Only dates after today pass the future-expiry rule
        #[test]
        fn prop_expiry_must_be_after_today(offset in -365i64..365) {
            let today = date(2025, 6, 1);
            let expiry = today + Duration::days(offset);
            prop_assert_eq!(validate_expiry_in_future(expiry, today).is_ok(), offset > 0);
        }
    }
}
