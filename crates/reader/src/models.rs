//! Section data as stored offline and as handed to readers.

use crate::error::{Error, ErrorKind};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Requested version title per language slot.
///
/// A `BTreeMap` so that two selections with the same entries always compare
/// and hash the same, which the section cache relies on.
pub type VersionSelection = BTreeMap<Language, String>;

/// Language slots a section is assembled from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[display("en")]
    En,
    #[display("he")]
    He,
}
impl Language {
    pub const ALL: [Language; 2] = [Language::En, Language::He];
}
impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Self::En),
            "he" => Ok(Self::He),
            other => exn::bail!(ErrorKind::UnknownLanguage(other.to_string())),
        }
    }
}

/// One version listed by a section's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version_title: String,
    /// Free-form: metadata may list languages that have no slot here.
    pub language: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Contents of a `<stem>.metadata.json` file (or one entry of its
/// `sections` object).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SectionMetadata {
    #[serde(default)]
    pub section_ref: String,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
    /// Per segment link lists, positionally aligned with the text arrays.
    #[serde(default)]
    pub links: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
impl SectionMetadata {
    /// First version listed for the language, in manifest order.
    pub fn default_version(&self, language: Language) -> Option<&str> {
        let code = language.to_string();
        self.versions
            .iter()
            .find(|version| version.language == code)
            .map(|version| version.version_title.as_str())
    }
}

/// Contents of a monolithic `<stem>.json` file from older exports.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LegacySection {
    #[serde(default)]
    pub section_ref: String,
    #[serde(default)]
    pub content: Vec<Map<String, Value>>,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// 1-based position within the section.
    pub segment_number: String,
    pub text: String,
    pub he: String,
    pub links: Vec<Value>,
}

/// Which on-disk layout a section was assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionSource {
    /// Metadata file plus one text file per version.
    Current,
    /// Monolithic section file with default versions only.
    Legacy,
}

/// An assembled, immutable section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub section_ref: String,
    pub requested_ref: String,
    pub is_section_level: bool,
    pub source: SectionSource,
    /// Versions the metadata lists as available.
    pub versions: Vec<VersionInfo>,
    /// Versions the content was actually built from.
    pub current_versions: VersionSelection,
    /// Language slots that could not be loaded.
    pub missing_languages: Vec<Language>,
    pub content: Vec<Segment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
impl Section {
    pub fn is_partial(&self) -> bool {
        !self.missing_languages.is_empty()
    }
}

/// Joined text of a segment, a segment range or a whole section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefText {
    pub section_ref: String,
    pub en: String,
    pub he: String,
}
