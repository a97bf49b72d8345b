//! dl-db - Warehouse persistence for dimload
//!
//! This crate provides the `Warehouse` and `Extractor` traits, a DuckDB
//! warehouse holding dimension and fact tables, and extractors for
//! in-process record sets and CSV files.

pub mod duckdb;
pub mod error;
pub mod extract;
pub(crate) mod row;
pub mod traits;

pub use crate::duckdb::DuckDbWarehouse;
pub use error::{DbError, DbResult};
pub use extract::{CsvExtractor, MemoryExtractor};
pub use traits::{Extractor, FactWriteSummary, Warehouse};
