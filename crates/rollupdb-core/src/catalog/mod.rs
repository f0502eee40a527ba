//! Breakdown catalog.
//!
//! The catalog holds the static set of precomputed breakdown tables and the
//! column-encoding filter variants each one is written with.

mod breakdown;
mod catalog;

pub use breakdown::{BreakdownDef, FilterDef, NULL_FILTER_NAME};
pub use catalog::Catalog;
