//! HTTP handlers for the POS back-office

use shared::Pagination;

pub mod bank_account;
pub mod expiry;
pub mod health;
pub mod payment_type;
pub mod reconciliation;

pub use bank_account::*;
pub use expiry::*;
pub use health::*;
pub use payment_type::*;
pub use reconciliation::*;

/// Build pagination from optional `page` / `per_page` query values
pub(crate) fn page_params(page: Option<u32>, per_page: Option<u32>) -> Pagination {
    let defaults = Pagination::default();
    Pagination {
        page: page.unwrap_or(defaults.page),
        per_page: per_page.unwrap_or(defaults.per_page),
    }
    .normalized()
}
