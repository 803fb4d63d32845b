use crate::error::Result;
use async_trait::async_trait;

/// Bounds for an inventory refresh.
///
/// Sources that query remote services can restrict the request to a time
/// window; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Constraint {
    pub tmin: Option<f64>,
    pub tmax: Option<f64>,
}

impl Constraint {
    pub fn spanning(tmin: f64, tmax: f64) -> Self {
        Self { tmin: Some(tmin), tmax: Some(tmax) }
    }
}

/// A remote metadata source feeding the index.
///
/// A source owns some external inventory (a station service, a data center
/// holdings listing…) and materializes it as local files. Refreshing may
/// hit the network, cache aggressively, or do nothing; the catalog only
/// cares about the file names that became newly available or changed, which
/// it routes through the temporal index's `add`.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Refresh the inventory within `constraint` and report the names of
    /// files that are new or were rewritten by the refresh.
    async fn update_inventory(&mut self, constraint: &Constraint) -> Result<Vec<String>>;
}
