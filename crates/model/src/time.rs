//! Time splitting and the duration-bucket ladder.

/// Ascending ladder of duration edges, in seconds.
///
/// A factor-20 ladder from one second up to roughly two years. A nut whose
/// span duration is `d` belongs to the bucket of the smallest edge strictly
/// greater than `d`; durations beyond the last edge land in the overflow
/// bucket. The ladder is part of the persisted format: changing it
/// invalidates every stored `kscale` column.
pub const TSCALE_EDGES: [f64; 7] = [
    1.0,
    20.0,
    400.0,
    8_000.0,
    160_000.0,
    3_200_000.0,
    64_000_000.0,
];

/// Bucket id for durations exceeding every ladder edge.
pub const KSCALE_OVERFLOW: i64 = TSCALE_EDGES.len() as i64;

/// Split an absolute time into integer seconds and a sub-second offset.
///
/// The offset is always in `[0, 1)`, also for negative times (floor, not
/// truncation), so that `tmin_seconds <= tmax_seconds` whenever
/// `tmin <= tmax`.
pub fn tsplit(t: f64) -> (i64, f64) {
    let seconds = t.floor();
    (seconds as i64, t - seconds)
}

/// Inverse of [`tsplit`].
pub fn tjoin(seconds: i64, offset: f64) -> f64 {
    seconds as f64 + offset
}

/// Duration bucket for a span of `duration` seconds.
///
/// Smallest index into [`TSCALE_EDGES`] whose edge strictly exceeds the
/// duration, or [`KSCALE_OVERFLOW`]. A duration exactly on an edge falls
/// into the next bucket, so every non-overflow bucket `b` only ever holds
/// spans shorter than `TSCALE_EDGES[b]` — the invariant the span query
/// relies on for range pruning.
pub fn kscale_for_duration(duration: f64) -> i64 {
    for (kscale, edge) in TSCALE_EDGES.iter().enumerate() {
        if duration < *edge {
            return kscale as i64;
        }
    }
    KSCALE_OVERFLOW
}
