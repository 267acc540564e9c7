//! Role gate applied before any catalog or enrollment operation touches storage.
//!
//! Roles are flat: `admin` does not satisfy a `registrar` requirement and vice versa.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{StudentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Registrar,
    Cashier,
    Student,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Registrar, Role::Cashier, Role::Student];

    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Registrar => "registrar",
            Role::Cashier => "cashier",
            Role::Student => "student",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "registrar" => Some(Self::Registrar),
            "cashier" => Some(Self::Cashier),
            "student" => Some(Self::Student),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved identity of the caller for the duration of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub role: Role,
    pub username: String,
    pub user_id: UserId,
    /// Linked student row; only populated for the `student` role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<StudentId>,
}

impl AccessContext {
    pub fn new(role: Role, username: impl Into<String>, user_id: UserId) -> Self {
        Self {
            role,
            username: username.into(),
            user_id,
            student_id: None,
        }
    }

    pub fn with_student(mut self, student_id: StudentId) -> Self {
        self.student_id = Some(student_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(AccessDenied),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Reason an operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("authentication required")]
    MissingIdentity,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("role '{actual}' may not perform an operation reserved for '{required}'")]
    RoleMismatch { required: Role, actual: Role },
    #[error("student account '{username}' is not linked to a student record")]
    UnlinkedStudent { username: String },
    #[error("'{username}' may not access this record")]
    NotOwner { username: String },
}

/// Decide whether `context` carries exactly `required`.
pub fn authorize(context: Option<&AccessContext>, required: Role) -> AccessDecision {
    match context {
        None => AccessDecision::Deny(AccessDenied::MissingIdentity),
        Some(ctx) if ctx.role == required => AccessDecision::Allow,
        Some(ctx) => AccessDecision::Deny(AccessDenied::RoleMismatch {
            required,
            actual: ctx.role,
        }),
    }
}

/// `authorize` as a `Result`, handing back the context on success.
pub fn require(
    context: Option<&AccessContext>,
    required: Role,
) -> Result<&AccessContext, AccessDenied> {
    match authorize(context, required) {
        AccessDecision::Allow => context.ok_or(AccessDenied::MissingIdentity),
        AccessDecision::Deny(reason) => {
            tracing::warn!(
                required = %required,
                caller = context.map(|ctx| ctx.username.as_str()).unwrap_or("<anonymous>"),
                "access denied"
            );
            Err(reason)
        }
    }
}

/// Any authenticated caller, regardless of role.
pub fn require_any(context: Option<&AccessContext>) -> Result<&AccessContext, AccessDenied> {
    context.ok_or_else(|| {
        tracing::warn!("access denied: anonymous caller");
        AccessDenied::MissingIdentity
    })
}

/// Student caller with a linked student record.
pub fn require_student(
    context: Option<&AccessContext>,
) -> Result<(&AccessContext, StudentId), AccessDenied> {
    let ctx = require(context, Role::Student)?;
    match ctx.student_id {
        Some(student_id) => Ok((ctx, student_id)),
        None => Err(AccessDenied::UnlinkedStudent {
            username: ctx.username.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: Role) -> AccessContext {
        AccessContext::new(role, "tester", UserId(7))
    }

    #[test]
    fn missing_context_is_denied() {
        assert_eq!(
            authorize(None, Role::Admin),
            AccessDecision::Deny(AccessDenied::MissingIdentity)
        );
    }

    #[test]
    fn matching_role_is_allowed() {
        for role in Role::ALL {
            assert!(authorize(Some(&context(role)), role).is_allowed());
        }
    }

    #[test]
    fn admin_does_not_satisfy_registrar() {
        let admin = context(Role::Admin);
        assert_eq!(
            authorize(Some(&admin), Role::Registrar),
            AccessDecision::Deny(AccessDenied::RoleMismatch {
                required: Role::Registrar,
                actual: Role::Admin,
            })
        );
    }

    #[test]
    fn student_without_link_is_rejected() {
        let student = context(Role::Student);
        assert!(matches!(
            require_student(Some(&student)),
            Err(AccessDenied::UnlinkedStudent { .. })
        ));

        let linked = context(Role::Student).with_student(StudentId(3));
        let (_, student_id) = require_student(Some(&linked)).expect("linked student");
        assert_eq!(student_id, StudentId(3));
    }

    #[test]
    fn role_labels_parse_case_insensitively() {
        assert_eq!(Role::parse("REGISTRAR"), Some(Role::Registrar));
        assert_eq!(Role::parse("dean"), None);
    }
}
