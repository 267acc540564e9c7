//! Enrollment submissions and their registrar review.
//!
//! An enrollment starts `pending` and is moved once to `approved` or `rejected`. Under
//! [`TransitionPolicy::Permissive`](crate::config::TransitionPolicy) later decisions
//! overwrite the stored status instead of failing.

pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use router::enrollment_router;
pub use service::{EnrollmentRequest, EnrollmentWorkflow, ValidationRequest};
