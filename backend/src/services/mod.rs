//! Business logic services for the POS back-office

pub mod activity;
pub mod bank_account;
pub mod discrepancy;
pub mod expiry;
pub mod matching;
pub mod payment_type;
pub mod reconciliation;
pub mod statement;

pub use bank_account::BankAccountService;
pub use discrepancy::DiscrepancyService;
pub use expiry::ExpiryService;
pub use matching::MatchingService;
pub use payment_type::PaymentTypeService;
pub use reconciliation::ReconciliationService;
pub use statement::StatementService;
