//! Core metadata records for the hoard index.
//!
//! A collection of scientific data files is indexed as a flat set of "nuts":
//! one lightweight record per identifiable content unit inside a file, each
//! carrying a time span, a coarse category (`kind`) and a compound
//! identifying key (`codes`). This crate defines those records and the two
//! numeric conventions everything else is built on:
//!
//! - **Time split**: absolute times are stored as integer seconds plus a
//!   sub-second float offset in `[0, 1)`, so range pruning can compare
//!   integers and offsets only break exact-second ties. See [`tsplit`].
//! - **Duration buckets**: every nut is assigned to a bucket of a fixed
//!   factor-20 ladder of duration edges (`kscale`), which turns unbounded
//!   interval-overlap queries into a bounded union of per-bucket range
//!   scans. See [`kscale_for_duration`].
//!
//! Persistence and querying live in `hoard-catalog`; this crate has no I/O.

mod codes;
pub mod error;
mod nut;
mod time;

pub use crate::codes::{CODES_SEPARATOR, Codes};
pub use crate::nut::Nut;
pub use crate::time::{KSCALE_OVERFLOW, TSCALE_EDGES, kscale_for_duration, tjoin, tsplit};
