//! Wire models of the export manifests and the bundle endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// One entry of `packages.json`.
///
/// Older exports key packages as `en`/`he`/`indexes`; both spellings are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    #[serde(alias = "en")]
    pub name: String,
    #[serde(default, alias = "he")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default, alias = "indexes")]
    pub document_titles: Vec<String>,
    /// Advisory download size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Contents of `last_updated.json`: when each document was last exported.
///
/// Timestamps are kept as the raw strings the server sent; see
/// [`LastUpdated::timestamp`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastUpdated {
    pub schema_version: Option<String>,
    pub comment: Option<String>,
    pub titles: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LastUpdatedWire {
    Full {
        #[serde(default, deserialize_with = "string_or_number")]
        schema_version: Option<String>,
        #[serde(default)]
        comment: Option<String>,
        titles: BTreeMap<String, String>,
    },
    Bare(BTreeMap<String, String>),
}

impl<'de> Deserialize<'de> for LastUpdated {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match LastUpdatedWire::deserialize(deserializer)? {
            LastUpdatedWire::Full { schema_version, comment, titles } => Self { schema_version, comment, titles },
            LastUpdatedWire::Bare(titles) => Self { titles, ..Self::default() },
        })
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}

impl LastUpdated {
    /// Remote export time of `title`.
    ///
    /// `None` when the title is not listed or its timestamp cannot be parsed.
    pub fn timestamp(&self, title: &str) -> Option<OffsetDateTime> {
        self.titles.get(title).and_then(|raw| parse_timestamp(raw))
    }
}

/// Parse an export timestamp.
///
/// Accepts RFC 3339 as well as the offset-less ISO 8601 the exporter writes
/// (with or without fractional seconds, or a bare date), which is taken to be
/// UTC.
///
/// ```
/// use folio_catalog::parse_timestamp;
/// use time::macros::datetime;
///
/// assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(datetime!(2024-01-02 03:04:05 UTC)));
/// assert_eq!(parse_timestamp("2024-01-02T03:04:05"), Some(datetime!(2024-01-02 03:04:05 UTC)));
/// assert_eq!(parse_timestamp("yesterday"), None);
/// ```
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    let with_fraction = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    let without_fraction = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(parsed) = PrimitiveDateTime::parse(raw, with_fraction) {
        return Some(parsed.assume_utc());
    }
    if let Ok(parsed) = PrimitiveDateTime::parse(raw, without_fraction) {
        return Some(parsed.assume_utc());
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]")).ok().map(|date| date.midnight().assume_utc())
}

/// Outcome of asking the server for a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleStatus {
    /// The server is still building the bundle (HTTP 202).
    Preparing,
    Ready(BundleTicket),
}

/// Where to fetch a prepared bundle from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleTicket {
    /// Absolute URLs, downloaded in order.
    pub urls: Vec<String>,
    /// Advisory total size in bytes.
    pub download_size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BundleTicketWire {
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub bundle_array: Vec<String>,
    #[serde(default)]
    pub download_size: Option<u64>,
}

impl BundleTicketWire {
    pub(crate) fn locations(self) -> Vec<String> {
        match self.bundle_array.is_empty() {
            true => self.bundle.into_iter().collect(),
            false => self.bundle_array,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[test]
    fn test_package_legacy_keys() {
        let json = r#"[
            {"en": "COMPLETE LIBRARY", "he": "כל הספרייה", "parent": null, "indexes": [], "size": 1024},
            {"en": "Torah with Rashi", "parent": "COMPLETE LIBRARY", "indexes": ["Genesis", "Rashi on Genesis"]}
        ]"#;
        let packages: Vec<PackageDescriptor> = serde_json::from_str(json).unwrap();
        assert_eq!(packages[0].name, "COMPLETE LIBRARY");
        assert_eq!(packages[0].display_name.as_deref(), Some("כל הספרייה"));
        assert_eq!(packages[0].parent, None);
        assert_eq!(packages[0].size, Some(1024));
        assert_eq!(packages[1].document_titles, vec!["Genesis", "Rashi on Genesis"]);
    }

    #[test]
    fn test_package_current_keys() {
        let json = r#"{"name": "Tanakh", "displayName": "תנ״ך", "documentTitles": ["Genesis"]}"#;
        let package: PackageDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(package.name, "Tanakh");
        assert_eq!(package.parent, None);
        assert_eq!(package.document_titles, vec!["Genesis"]);
    }

    #[test]
    fn test_last_updated_full() {
        let json = r#"{"schema_version": 7, "comment": "nightly", "titles": {"Genesis": "2024-01-02T03:04:05"}}"#;
        let last: LastUpdated = serde_json::from_str(json).unwrap();
        assert_eq!(last.schema_version.as_deref(), Some("7"));
        assert_eq!(last.comment.as_deref(), Some("nightly"));
        assert_eq!(last.timestamp("Genesis"), Some(datetime!(2024-01-02 03:04:05 UTC)));
        assert_eq!(last.timestamp("Exodus"), None);
    }

    #[test]
    fn test_last_updated_bare_map() {
        let json = r#"{"Genesis": "2024-01-02T03:04:05Z"}"#;
        let last: LastUpdated = serde_json::from_str(json).unwrap();
        assert_eq!(last.schema_version, None);
        assert!(last.titles.contains_key("Genesis"));
    }

    #[rstest]
    #[case("2024-01-02T03:04:05+02:00", Some(datetime!(2024-01-02 01:04:05 UTC)))]
    #[case("2024-01-02T03:04:05.250", Some(datetime!(2024-01-02 03:04:05.25 UTC)))]
    #[case("2024-01-02", Some(datetime!(2024-01-02 00:00:00 UTC)))]
    #[case(" 2024-01-02T03:04:05Z ", Some(datetime!(2024-01-02 03:04:05 UTC)))]
    #[case("", None)]
    #[case("02/01/2024", None)]
    fn test_parse_timestamp(#[case] raw: &str, #[case] expected: Option<OffsetDateTime>) {
        assert_eq!(parse_timestamp(raw), expected);
    }

    #[rstest]
    #[case(r#"{"bundle": "bundles/a.zip", "downloadSize": 10}"#, vec!["bundles/a.zip"])]
    #[case(r#"{"bundleArray": ["b1.zip", "b2.zip"]}"#, vec!["b1.zip", "b2.zip"])]
    #[case(r#"{}"#, vec![])]
    fn test_bundle_locations(#[case] json: &str, #[case] expected: Vec<&str>) {
        let wire: BundleTicketWire = serde_json::from_str(json).unwrap();
        assert_eq!(wire.locations(), expected);
    }
}
