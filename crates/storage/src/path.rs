//! Path validation.
//!
//! Entry names come from remote bundles and document titles come from a
//! remote manifest, so every path is checked before it reaches a backend.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and returns it normalized.
///
/// `.` components and redundant separators are dropped and `..` is resolved
/// lexically. A path that would leave the storage root, contains a null byte,
/// carries a Windows prefix or is empty after normalization is rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use folio_storage::validate_path;
/// assert!(validate_path("Genesis.zip").is_ok());
/// assert!(validate_path("Rashi on Genesis 1.metadata.json").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err());
/// assert_eq!(
///     validate_path("tmp/.././Genesis.zip").unwrap(),
///     Path::new("Genesis.zip")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(original.to_path_buf()));
    let mut normalized = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => return Err(invalid()),
            Component::Normal(part) => normalized.push(part),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(invalid()),
            Component::ParentDir => {
                normalized.pop().ok_or_else(invalid)?;
            },
        }
    }
    if normalized.is_empty() {
        return Err(invalid());
    }
    Ok(normalized.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Genesis.zip", "Genesis.zip")]
    #[case("Genesis 1.metadata.json", "Genesis 1.metadata.json")]
    #[case("a//b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("library/", "library")]
    #[case("/Genesis.zip", "Genesis.zip")]
    fn test_valid(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("./.")]
    #[case("//")]
    #[case("..")]
    #[case("../Genesis.zip")]
    #[case("a/../../b")]
    #[case("a\0b")]
    fn test_invalid(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }
}
