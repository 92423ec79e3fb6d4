//! # dmmconc
//!
//! Cross-edition concordance pipeline for De Materia Medica
//!
//! ## Modules
//!
//! - [`xlsx`] - Minimal workbook reader (shared strings, inline strings)
//! - [`editions`] - Per-edition CSV extraction from the source workbook
//! - [`master`] - Master register + per-chapter concordance
//! - [`alignment`] - Beck/Berendes record linkage with span inference
//! - [`ids`] - Stable master key assignment over the concordance
//! - [`gunther`] - TEI chapter scraping for the Gunther edition
//! - [`citations`] - Canonical citation rows from revised TSVs
//! - [`iiif`] - Citation-to-IIIF canvas mapping and review queues
//! - [`validate`] - Cross-checks over citation and IIIF artifacts
//! - [`migrate`] - Legacy XML database to normalized CSVs
//! - [`db`] - SQLite import/export of the normalized tables
//! - [`compare`] - Rough mapping vs generated alignment diffing
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! fn main() -> dmmconc::Result<()> {
//!     let xlsx = Path::new("Materia Medica.xlsx");
//!     dmmconc::editions::extract_editions(xlsx, Path::new("data/editions"))?;
//!     dmmconc::master::run(xlsx, Path::new("data"))?;
//!     dmmconc::alignment::run(xlsx, Path::new("data/alignments"), "beck-berendes-sample")?;
//!     Ok(())
//! }
//! ```

pub mod alignment;
pub mod citations;
pub mod compare;
pub mod db;
pub mod editions;
pub mod error;
pub mod gunther;
pub mod ids;
pub mod iiif;
pub mod master;
pub mod migrate;
pub mod norm;
pub mod tabular;
pub mod validate;
pub mod xlsx;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ConcordError, Result};
