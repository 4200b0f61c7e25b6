//! Test utilities for the Rubric crates.
//!
//! - [`db_writer`] builds complete source databases from in-memory documents
//! - [`data_gen`] generates deterministic synthetic collections
//! - [`dump`] reads databases back into logical views that do not depend on
//!   chunk boundaries or block layout
//!
//! The crate is meant for the integration tests and development tools of the
//! workspace.

pub mod data_gen;
pub mod db_writer;
pub mod dump;

pub use db_writer::{DatabaseWriter, Document};

/// Creates a temporary directory for test databases.
pub fn temp_dir() -> anyhow::Result<tempfile::TempDir> {
    Ok(tempfile::Builder::new().prefix("rubric-test-").tempdir()?)
}
