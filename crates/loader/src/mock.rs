//! In-memory content loader for testing.

use crate::error::{ErrorKind, Result};
use crate::loader::{ContentLoader, Harvest};
use async_trait::async_trait;
use hoard_model::Nut;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MockFile {
    format: String,
    mtime: f64,
    nuts: Vec<Nut>,
    readable: bool,
}

/// In-memory content loader for testing.
///
/// Files live in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Ideal for unit
/// tests that need a [`ContentLoader`] without filesystem dependencies.
///
/// Re-adding nuts for a file name bumps its modification time by one
/// second, which is exactly what a staleness check needs to observe a
/// "file changed on disk" transition.
#[derive(Debug, Default)]
pub struct MockLoader {
    files: RwLock<HashMap<String, MockFile>>,
    unknown_formats: RwLock<HashSet<String>>,
}

impl MockLoader {
    /// Install (or replace) a file's nut records.
    ///
    /// Nuts are grouped by their `file_name`; each named file gets the
    /// format of its first nut and a modification time one second above its
    /// previous one (`0.0` for a brand new file).
    ///
    /// Panics on a duplicate `(file_segment, file_element)` within one
    /// file. The panic is DELIBERATE: this is a test helper, and if test
    /// setup is wrong the test should not pass.
    pub async fn add_nuts(&self, nuts: impl IntoIterator<Item = Nut>) {
        let mut by_file: HashMap<String, Vec<Nut>> = HashMap::new();
        for nut in nuts {
            by_file.entry(nut.file_name.clone()).or_default().push(nut);
        }
        let mut files = self.files.write().await;
        for (file_name, nuts) in by_file {
            let mut seen = HashSet::new();
            for nut in &nuts {
                if !seen.insert((nut.file_segment, nut.file_element)) {
                    panic!(
                        "MockLoader::add_nuts: duplicate (segment, element) in {file_name}"
                    );
                }
            }
            let mtime = files.get(&file_name).map_or(0.0, |f| f.mtime + 1.0);
            let format = nuts[0].file_format.clone();
            files.insert(file_name, MockFile { format, mtime, nuts, readable: true });
        }
    }

    /// Force a file's modification time without changing its content.
    pub async fn touch(&self, file_name: &str, mtime: f64) {
        if let Some(file) = self.files.write().await.get_mut(file_name) {
            file.mtime = mtime;
        }
    }

    /// Remove a file, as if it vanished from disk.
    pub async fn remove(&self, file_name: &str) {
        self.files.write().await.remove(file_name);
    }

    /// Make a file present but unreadable (permissions, truncation…).
    pub async fn set_unreadable(&self, file_name: &str, unreadable: bool) {
        if let Some(file) = self.files.write().await.get_mut(file_name) {
            file.readable = !unreadable;
        }
    }

    /// Pretend no provider exists for `format`.
    pub async fn forget_format(&self, format: &str) {
        self.unknown_formats.write().await.insert(format.to_string());
    }
}

#[async_trait]
impl ContentLoader for MockLoader {
    async fn exists(&self, file_name: &str) -> bool {
        self.files.read().await.contains_key(file_name)
    }

    async fn mtime(&self, file_name: &str, format: &str) -> Result<f64> {
        if self.unknown_formats.read().await.contains(format) {
            exn::bail!(ErrorKind::UnknownFormat(format.to_string()));
        }
        let files = self.files.read().await;
        match files.get(file_name) {
            Some(file) if file.readable => Ok(file.mtime),
            _ => exn::bail!(ErrorKind::Unreadable(file_name.to_string())),
        }
    }

    async fn load(&self, file_name: &str, format: Option<&str>) -> Result<Harvest> {
        if let Some(format) = format
            && self.unknown_formats.read().await.contains(format)
        {
            exn::bail!(ErrorKind::UnknownFormat(format.to_string()));
        }
        let files = self.files.read().await;
        let Some(file) = files.get(file_name).filter(|f| f.readable) else {
            exn::bail!(ErrorKind::Unreadable(file_name.to_string()));
        };
        Ok(Harvest {
            format: file.format.clone(),
            mtime: file.mtime,
            nuts: file.nuts.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_model::Codes;

    fn nut(file_name: &str, element: i64) -> Nut {
        Nut {
            file_name: file_name.to_string(),
            file_format: "test".to_string(),
            file_mtime: 0.0,
            file_segment: 0,
            file_element: element,
            kind: "waveform".to_string(),
            codes: Codes::new(["STA"]).unwrap(),
            tmin_seconds: 0,
            tmin_offset: 0.0,
            tmax_seconds: 10,
            tmax_offset: 0.0,
            deltat: 1.0,
        }
    }

    #[tokio::test]
    async fn test_readd_bumps_mtime() {
        let loader = MockLoader::default();
        loader.add_nuts([nut("a", 0)]).await;
        assert_eq!(loader.mtime("a", "test").await.unwrap(), 0.0);
        loader.add_nuts([nut("a", 0), nut("a", 1)]).await;
        assert_eq!(loader.mtime("a", "test").await.unwrap(), 1.0);
        assert_eq!(loader.load("a", None).await.unwrap().nuts.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_vs_unknown_format() {
        let loader = MockLoader::default();
        loader.add_nuts([nut("a", 0)]).await;

        let err = loader.mtime("missing", "test").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unreadable(_)));
        assert!(err.is_retryable());

        loader.forget_format("exotic").await;
        let err = loader.mtime("a", "exotic").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownFormat(_)));
        assert!(!err.is_retryable());

        loader.set_unreadable("a", true).await;
        assert!(loader.exists("a").await);
        let err = loader.load("a", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unreadable(_)));
    }

    #[tokio::test]
    #[should_panic(expected = "duplicate (segment, element)")]
    async fn test_duplicate_elements_panic() {
        let loader = MockLoader::default();
        loader.add_nuts([nut("a", 0), nut("a", 0)]).await;
    }
}
