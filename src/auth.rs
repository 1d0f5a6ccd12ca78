use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
    Customer,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            "customer" => Some(Role::Customer),
            _ => None,
        }
    }
}

/// Caller identity as asserted by the gateway in front of this service.
/// The gateway terminates authentication and forwards the verified
/// identity through `x-user-id`, `x-user-role` and (for staff scoped to
/// one warehouse) `x-warehouse-scope`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub role: Role,
    pub warehouse_scope: Option<i32>,
}

impl AuthContext {
    pub fn ensure_admin(&self) -> Result<(), ServiceError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "this operation requires the admin role".to_string(),
            ))
        }
    }

    pub fn ensure_staff(&self) -> Result<(), ServiceError> {
        match self.role {
            Role::Admin | Role::Staff => Ok(()),
            Role::Customer => Err(ServiceError::Forbidden(
                "this operation requires a staff role".to_string(),
            )),
        }
    }

    /// Admins act on any warehouse; scoped staff only on their own.
    pub fn ensure_warehouse(&self, warehouse_id: i32) -> Result<(), ServiceError> {
        match (self.role, self.warehouse_scope) {
            (Role::Admin, _) => Ok(()),
            (Role::Staff, None) => Ok(()),
            (Role::Staff, Some(scope)) if scope == warehouse_id => Ok(()),
            _ => Err(ServiceError::Forbidden(format!(
                "caller is not allowed to operate on warehouse {}",
                warehouse_id
            ))),
        }
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Option<&str> {
            parts.headers.get(name).and_then(|v| v.to_str().ok())
        };

        let user_id = header("x-user-id")
            .ok_or_else(|| ServiceError::Forbidden("missing x-user-id header".to_string()))?
            .parse::<i64>()
            .map_err(|_| ServiceError::Forbidden("invalid x-user-id header".to_string()))?;

        let role = header("x-user-role")
            .and_then(Role::from_str)
            .ok_or_else(|| {
                ServiceError::Forbidden("missing or invalid x-user-role header".to_string())
            })?;

        let warehouse_scope = match header("x-warehouse-scope") {
            Some(raw) => Some(raw.parse::<i32>().map_err(|_| {
                ServiceError::Forbidden("invalid x-warehouse-scope header".to_string())
            })?),
            None => None,
        };

        Ok(AuthContext {
            user_id,
            role,
            warehouse_scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, scope: Option<i32>) -> AuthContext {
        AuthContext {
            user_id: 1,
            role,
            warehouse_scope: scope,
        }
    }

    #[test]
    fn admin_passes_all_checks() {
        let admin = ctx(Role::Admin, None);
        assert!(admin.ensure_admin().is_ok());
        assert!(admin.ensure_warehouse(7).is_ok());
    }

    #[test]
    fn scoped_staff_limited_to_own_warehouse() {
        let staff = ctx(Role::Staff, Some(3));
        assert!(staff.ensure_warehouse(3).is_ok());
        assert!(staff.ensure_warehouse(4).is_err());
        assert!(staff.ensure_admin().is_err());
    }

    #[test]
    fn unscoped_staff_operates_anywhere() {
        let staff = ctx(Role::Staff, None);
        assert!(staff.ensure_warehouse(1).is_ok());
        assert!(staff.ensure_warehouse(99).is_ok());
    }

    #[test]
    fn customers_never_touch_warehouses() {
        let customer = ctx(Role::Customer, None);
        assert!(customer.ensure_warehouse(1).is_err());
    }
}
