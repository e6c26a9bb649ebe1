//! Authenticated caller identity.
//!
//! The caller is resolved once per request and passed explicitly into every
//! engine operation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sees and mutates every team's resources.
    SuperAdmin,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// Team restriction to apply on reads, `None` when the caller sees all teams.
    pub fn team_scope(&self) -> Option<Uuid> {
        if self.is_super_admin() {
            None
        } else {
            Some(self.team_id)
        }
    }

    pub fn can_access(&self, team_id: Uuid) -> bool {
        self.is_super_admin() || self.team_id == team_id
    }

    /// Require write entitlement on a resource owned by `team_id`.
    pub fn ensure_team(&self, team_id: Uuid) -> Result<()> {
        if self.can_access(team_id) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "operation not permitted on resources of team {}",
                team_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> Caller {
        Caller {
            user_id: Uuid::now_v7(),
            team_id: Uuid::now_v7(),
            role,
        }
    }

    #[test]
    fn test_super_admin_sees_every_team() {
        let admin = caller(Role::SuperAdmin);
        assert_eq!(admin.team_scope(), None);
        assert!(admin.ensure_team(Uuid::now_v7()).is_ok());
    }

    #[test]
    fn test_user_is_restricted_to_own_team() {
        let user = caller(Role::User);
        assert_eq!(user.team_scope(), Some(user.team_id));
        assert!(user.ensure_team(user.team_id).is_ok());
        assert!(matches!(
            user.ensure_team(Uuid::now_v7()),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("super_admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
    }
}
