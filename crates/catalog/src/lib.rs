//! SQLite-backed catalog and temporal index for hoard metadata.
//!
//! Two layers share one database:
//!
//! - **Durable catalog**: `files`, `nuts` and interned `kind_codes`,
//!   written through [`Catalog::dig`] and surviving process restarts.
//! - **Ephemeral overlay**: named [`Selection`]s with per-member freshness
//!   states, plus the per-selection duration-bucketed nut mirror behind
//!   [`Squirrel`]'s span queries. Overlay rows are namespaced by selection
//!   id in shared tables and swept when the database is opened, so crashed
//!   processes cannot leak them indefinitely.
//!
//! The usual flow: [`Database::open`], wrap it in a [`Catalog`], create a
//! [`Squirrel`], then `add` files through a
//! [`ContentLoader`](hoard_loader::ContentLoader) and ask it span
//! questions.

mod catalog;
mod db;
pub mod error;
mod ident;
mod models;
mod selection;
mod squirrel;

pub use crate::catalog::Catalog;
pub use crate::db::Database;
pub use crate::selection::{FileState, Selection};
pub use crate::squirrel::Squirrel;
