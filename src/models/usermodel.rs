use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    Provider,
    Admin,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Provider => "provider",
            UserRole::Admin => "admin",
        }
    }

    /// Capability check evaluated once at the API boundary instead of
    /// per-handler string comparisons.
    pub fn can_act_as(&self, required: &[UserRole]) -> bool {
        self == &UserRole::Admin || required.contains(self)
    }
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    // Provider ledger projection. Only the escrow release step may
    // increase these; withdrawals (out of scope here) decrease
    // available_balance_cents.
    pub available_balance_cents: i64,
    pub total_earnings_cents: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_passes_any_capability_check() {
        assert!(UserRole::Admin.can_act_as(&[UserRole::Customer]));
        assert!(UserRole::Admin.can_act_as(&[UserRole::Provider]));
    }

    #[test]
    fn non_admin_requires_listed_role() {
        assert!(UserRole::Customer.can_act_as(&[UserRole::Customer, UserRole::Provider]));
        assert!(!UserRole::Provider.can_act_as(&[UserRole::Customer]));
    }
}
