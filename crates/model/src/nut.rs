use crate::codes::Codes;
use crate::time::{kscale_for_duration, tjoin};

/// Minimal indexed metadata record for one content unit inside a file.
///
/// A file yields one nut per identifiable content unit (a waveform segment,
/// a station epoch, an event…). The nut carries everything the index needs
/// to answer "what is where, and when" without touching file content again:
/// the owning file's identity and modification time, the unit's position
/// inside the file, a category tag plus compound key, and the time span.
///
/// `(file_name, file_segment, file_element)` is unique within the catalog.
/// `tmin <= tmax` is expected from producers and not re-checked on the hot
/// path.
#[derive(Debug, Clone, PartialEq)]
pub struct Nut {
    /// Identity of the owning file.
    pub file_name: String,
    /// Format the owning file was detected as.
    pub file_format: String,
    /// Modification time of the owning file, epoch seconds.
    pub file_mtime: f64,
    /// Segment of the file this unit was found in.
    pub file_segment: i64,
    /// Position of this unit within its segment.
    pub file_element: i64,
    /// Coarse content category.
    pub kind: String,
    /// Compound identifying key.
    pub codes: Codes,
    /// Span start, integer seconds.
    pub tmin_seconds: i64,
    /// Span start, sub-second residual in `[0, 1)`.
    pub tmin_offset: f64,
    /// Span end, integer seconds.
    pub tmax_seconds: i64,
    /// Span end, sub-second residual in `[0, 1)`.
    pub tmax_offset: f64,
    /// Sampling interval in seconds, `0.0` if irregular.
    pub deltat: f64,
}

impl Nut {
    /// Span start as a float epoch time.
    pub fn tmin(&self) -> f64 {
        tjoin(self.tmin_seconds, self.tmin_offset)
    }

    /// Span end as a float epoch time.
    pub fn tmax(&self) -> f64 {
        tjoin(self.tmax_seconds, self.tmax_offset)
    }

    /// Span duration in seconds.
    pub fn duration(&self) -> f64 {
        (self.tmax_seconds - self.tmin_seconds) as f64 + (self.tmax_offset - self.tmin_offset)
    }

    /// Duration bucket this nut is indexed under.
    ///
    /// Derived, never stored on the struct: kscale is a pure function of
    /// the duration.
    pub fn kscale(&self) -> i64 {
        kscale_for_duration(self.duration())
    }
}
