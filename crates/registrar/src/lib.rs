//! Academic catalog management and the student enrollment approval workflow.

pub mod access;
pub mod accounts;
pub mod blocking;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod storage;
pub mod telemetry;

pub use access::{authorize, AccessContext, AccessDecision, AccessDenied, Role};
pub use error::{AppError, RegistrarError};
