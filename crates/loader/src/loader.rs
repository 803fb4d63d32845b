use crate::error::Result;
use async_trait::async_trait;
use hoard_model::Nut;

/// Everything a loader learned about one file in a single pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    /// Detected (or forced) format of the file.
    pub format: String,
    /// Modification time observed while reading, epoch seconds.
    pub mtime: f64,
    /// One nut per content unit found in the file.
    pub nuts: Vec<Nut>,
}

/// Unified interface for content loaders.
///
/// Implementations own format detection and content parsing; the catalog
/// only ever asks the three questions below. All operations are
/// asynchronous so network- or archive-backed loaders fit behind the same
/// seam as the local filesystem.
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Whether the file currently exists at all.
    ///
    /// Used by the staleness check even when mtime probing is disabled: a
    /// vanished file is always stale.
    async fn exists(&self, file_name: &str) -> bool;

    /// Live modification time of a file, probed with the provider for the
    /// recorded `format`.
    ///
    /// # Errors
    /// [`ErrorKind::Unreadable`](crate::error::ErrorKind::Unreadable) when
    /// the file cannot be read (stale, retry next scan);
    /// [`ErrorKind::UnknownFormat`](crate::error::ErrorKind::UnknownFormat)
    /// when no provider handles `format` (assumed stable, not retried).
    async fn mtime(&self, file_name: &str, format: &str) -> Result<f64>;

    /// Read a file and extract its nut records.
    ///
    /// `format` forces a specific provider; `None` means detect. The
    /// returned [`Harvest`] carries the format and mtime actually observed,
    /// which the caller stamps onto the nuts before indexing.
    async fn load(&self, file_name: &str, format: Option<&str>) -> Result<Harvest>;
}
