//! Process-unique selection names.

use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a name that no other selection in any live process shares.
///
/// The process id keeps concurrent processes on the same database apart,
/// the atomic counter keeps tasks within this process apart.
pub(crate) fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}
