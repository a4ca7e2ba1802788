//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// File metadata returned by storage backends.
///
/// The modification time doubles as the freshness marker of a downloaded
/// document archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// File stem if the file sits directly in the storage root and has the
    /// given extension.
    ///
    /// ```
    /// use folio_storage::FileInfo;
    /// use time::OffsetDateTime;
    ///
    /// let info = FileInfo::new("Genesis.zip", 10, OffsetDateTime::UNIX_EPOCH);
    /// assert_eq!(info.top_level_stem("zip"), Some("Genesis"));
    /// let nested = FileInfo::new("tmp/Genesis.zip", 10, OffsetDateTime::UNIX_EPOCH);
    /// assert_eq!(nested.top_level_stem("zip"), None);
    /// ```
    pub fn top_level_stem(&self, extension: &str) -> Option<&str> {
        if self.path.components().count() != 1 {
            return None;
        }
        let name = self.path.to_str()?;
        name.strip_suffix(extension)?.strip_suffix('.').filter(|stem| !stem.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Genesis.zip", Some("Genesis"))]
    #[case("Rashi on Genesis.zip", Some("Rashi on Genesis"))]
    #[case("Mishnah Berakhot.v2.zip", Some("Mishnah Berakhot.v2"))]
    #[case(".zip", None)]
    #[case("packages.json", None)]
    #[case("Genesiszip", None)]
    #[case("sub/Genesis.zip", None)]
    fn test_top_level_stem(#[case] path: &str, #[case] expected: Option<&str>) {
        let info = FileInfo::new(path, 0, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(info.top_level_stem("zip"), expected);
    }
}
