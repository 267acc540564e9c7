//! Accounts and sign-in: resolving an [`AccessContext`](crate::AccessContext) from
//! credentials, self-service student registration, and admin user management.

pub mod router;
pub mod service;

pub use router::accounts_router;
pub use service::{
    AccountService, CredentialVerifier, NewAccount, RegisteredAccount, StudentDashboard,
    StudentRegistration, UserUpdate,
};
