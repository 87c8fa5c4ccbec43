//! Permission and role models

use serde::{Deserialize, Serialize};

use super::string_enum;

/// Named permissions carried in a caller's permission list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewExpiryTracker,
    ManageExpiryTracker,
    ApproveExpiryTracker,
    ViewReconciliation,
    ManageReconciliation,
    ManageBankAccounts,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::ViewExpiryTracker,
        Permission::ManageExpiryTracker,
        Permission::ApproveExpiryTracker,
        Permission::ViewReconciliation,
        Permission::ManageReconciliation,
        Permission::ManageBankAccounts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewExpiryTracker => "view_expiry_tracker",
            Permission::ManageExpiryTracker => "manage_expiry_tracker",
            Permission::ApproveExpiryTracker => "approve_expiry_tracker",
            Permission::ViewReconciliation => "view_reconciliation",
            Permission::ManageReconciliation => "manage_reconciliation",
            Permission::ManageBankAccounts => "manage_bank_accounts",
        }
    }

    /// Permissions that also grant this one
    pub fn granted_by(&self) -> &'static [Permission] {
        match self {
            Permission::ViewExpiryTracker => &[
                Permission::ManageExpiryTracker,
                Permission::ApproveExpiryTracker,
            ],
            Permission::ViewReconciliation => &[
                Permission::ManageReconciliation,
                Permission::ManageBankAccounts,
            ],
            _ => &[],
        }
    }
}

string_enum!(Permission, "permission");

/// Check a raw permission-name list for `required`, honouring implied permissions
pub fn permits<S: AsRef<str>>(granted: &[S], required: Permission) -> bool {
    let has = |p: Permission| granted.iter().any(|g| g.as_ref() == p.as_str());
    has(required) || required.granted_by().iter().copied().any(has)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_permission() {
        let granted = vec!["manage_expiry_tracker".to_string()];
        assert!(permits(&granted, Permission::ManageExpiryTracker));
        assert!(!permits(&granted, Permission::ApproveExpiryTracker));
    }

    #[test]
    fn test_manage_implies_view() {
        assert!(permits(&["manage_expiry_tracker"], Permission::ViewExpiryTracker));
        assert!(permits(&["manage_bank_accounts"], Permission::ViewReconciliation));
        assert!(!permits(&["view_expiry_tracker"], Permission::ManageExpiryTracker));
    }

    #[test]
    fn test_empty_list_denies_everything() {
        let granted: Vec<String> = Vec::new();
        for p in Permission::ALL {
            assert!(!permits(&granted, p));
        }
    }
}
