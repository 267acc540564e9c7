//! Catalog reference data: programs, subjects with their prerequisite chains, and class
//! schedules. Writes are reserved for administrators.

pub mod import;
pub mod prerequisites;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use import::{CatalogImportError, CatalogImporter};
pub use router::catalog_router;
pub use service::{BulkInsertError, CatalogService};
