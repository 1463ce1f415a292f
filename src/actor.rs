//! Identity of the caller, as resolved by upstream auth
//!
//! Authorization is decided outside the core; what arrives here is the
//! authenticated user code plus the role the token carried. Review actions
//! (approve, reject, complete) require manager or above; creating a note only
//! requires being authenticated.

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Staff,
    Manager,
    Admin,
}

impl Role {
    pub fn can_review(self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_code: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_code: impl Into<String>, role: Role) -> Self {
        Self {
            user_code: user_code.into(),
            role,
        }
    }
}
