//! Migration core
//!
//! Everything between the catalogs and the HTTP layer: type mapping, column
//! reconciliation, sequence resolution, DDL generation, batch copy and the
//! run report.

pub mod compare;
pub mod copier;
pub mod ddl;
pub mod engine;
pub mod plan;
pub mod reconcile;
pub mod report;
pub mod runs;
pub mod sequence;
pub mod typemap;
pub mod value;
pub mod writer;

#[cfg(test)]
mod testing;

pub use engine::MigrationConfig;
pub use runs::{CancelOutcome, RunRegistry};
