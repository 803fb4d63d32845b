//! Collaborator contracts for feeding the hoard catalog.
//!
//! The catalog core never touches file content itself. It consumes
//! normalized nut records and exactly two capabilities, both defined here:
//!
//! - [`ContentLoader`]: given a file name, report whether the file is still
//!   there, probe its live modification time, and — on demand — extract its
//!   nut records. The mtime probe distinguishes *unreadable* (retry next
//!   scan) from *unknown format* (deliberately not retried).
//! - [`Source`]: a remote metadata source that, when refreshed, reports
//!   file names that became newly available (e.g. a freshly fetched station
//!   inventory written to the local cache).
//!
//! Real implementations (format detection, content parsers, network
//! clients) live outside this workspace. [`MockLoader`] (feature `mock`)
//! provides an in-memory stand-in for tests.

pub mod error;
mod loader;
#[cfg(feature = "mock")]
mod mock;
mod source;

pub use crate::loader::{ContentLoader, Harvest};
#[cfg(feature = "mock")]
pub use crate::mock::MockLoader;
pub use crate::source::{Constraint, Source};
