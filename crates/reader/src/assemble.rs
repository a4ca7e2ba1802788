//! Pure assembly of sections from already loaded file contents.

use crate::models::{Language, LegacySection, RefText, Section, SectionMetadata, SectionSource, Segment, VersionSelection};
use crate::refs;
use serde_json::Value;
use std::collections::BTreeMap;

/// Finds the section a file holds for the first matching candidate ref.
///
/// Files with a `sections` object hold several sections keyed by ref; any
/// other file is the section itself. Returns the ref the section was found
/// under, if it was found under one.
pub(crate) fn select_section<'a>(data: &'a Value, candidates: &[String]) -> Option<(Option<&'a str>, &'a Value)> {
    let Some(sections) = data.get("sections") else {
        return Some((None, data));
    };
    let sections = sections.as_object()?;
    candidates
        .iter()
        .find_map(|candidate| sections.get_key_value(candidate.as_str()))
        .map(|(key, section)| (Some(key.as_str()), section))
}

/// Text lines of one version; anything that is not a string counts as empty.
pub(crate) fn text_lines(data: &Value) -> Option<Vec<String>> {
    let lines = data.as_array()?;
    Some(lines.iter().map(|line| line.as_str().unwrap_or_default().to_string()).collect())
}

/// Per language text that was loaded, with the version title it came from.
pub(crate) type LoadedTexts = BTreeMap<Language, (String, Vec<String>)>;

pub(crate) fn current(requested_ref: &str, metadata: &SectionMetadata, loaded: LoadedTexts, missing: Vec<Language>) -> Section {
    let length = loaded.values().map(|(_, lines)| lines.len()).max().unwrap_or(0);
    let line = |language: Language, index: usize| {
        loaded
            .get(&language)
            .and_then(|(_, lines)| lines.get(index))
            .cloned()
            .unwrap_or_default()
    };
    let content = (0..length)
        .map(|index| Segment {
            segment_number: (index + 1).to_string(),
            text: line(Language::En, index),
            he: line(Language::He, index),
            links: links_at(&metadata.links, index),
        })
        .collect();
    let current_versions: VersionSelection = loaded.iter().map(|(language, (title, _))| (*language, title.clone())).collect();

    Section {
        section_ref: metadata.section_ref.clone(),
        requested_ref: requested_ref.to_string(),
        is_section_level: requested_ref == metadata.section_ref,
        source: SectionSource::Current,
        versions: metadata.versions.clone(),
        current_versions,
        missing_languages: missing,
        content,
        extra: metadata.extra.clone(),
    }
}

fn links_at(links: &[Value], index: usize) -> Vec<Value> {
    match links.get(index) {
        Some(Value::Array(links)) => links.clone(),
        _ => Vec::new(),
    }
}

pub(crate) fn legacy(requested_ref: &str, legacy: &LegacySection) -> Section {
    let field = |segment: &serde_json::Map<String, Value>, name: &str| {
        segment.get(name).and_then(Value::as_str).unwrap_or_default().to_string()
    };
    let content = legacy
        .content
        .iter()
        .enumerate()
        .map(|(index, segment)| Segment {
            segment_number: match segment.get("segmentNumber") {
                Some(Value::String(number)) => number.clone(),
                Some(Value::Number(number)) => number.to_string(),
                _ => (index + 1).to_string(),
            },
            text: field(segment, "text"),
            he: field(segment, "he"),
            links: match segment.get("links") {
                Some(Value::Array(links)) => links.clone(),
                _ => Vec::new(),
            },
        })
        .collect();

    let mut current_versions = VersionSelection::new();
    for (language, key) in [(Language::En, "versionTitle"), (Language::He, "heVersionTitle")] {
        if let Some(title) = legacy.extra.get(key).and_then(Value::as_str) {
            current_versions.insert(language, title.to_string());
        }
    }

    Section {
        section_ref: legacy.section_ref.clone(),
        requested_ref: requested_ref.to_string(),
        is_section_level: requested_ref == legacy.section_ref,
        source: SectionSource::Legacy,
        versions: legacy.versions.clone(),
        current_versions,
        missing_languages: Vec::new(),
        content,
        extra: legacy.extra.clone(),
    }
}

/// Joins the segments the section's requested ref points at.
///
/// A section level request joins every segment; `Genesis 1:3` picks one and
/// `Genesis 1:2-4` a range. A suffix that is not a segment number selects
/// nothing.
pub(crate) fn ref_text(section: &Section) -> RefText {
    let range = if section.is_section_level {
        Some((1, usize::MAX))
    } else {
        section
            .requested_ref
            .strip_prefix(section.section_ref.as_str())
            .and_then(|suffix| suffix.strip_prefix(':'))
            .and_then(refs::segment_range)
    };
    let selected: Vec<&Segment> = match range {
        Some((start, end)) => section
            .content
            .iter()
            .filter(|segment| {
                segment
                    .segment_number
                    .parse::<usize>()
                    .is_ok_and(|number| (start..=end).contains(&number))
            })
            .collect(),
        None => Vec::new(),
    };
    let join = |pick: fn(&Segment) -> &str| {
        selected
            .iter()
            .map(|segment| pick(segment))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };
    RefText {
        section_ref: section.section_ref.clone(),
        en: join(|segment| segment.text.as_str()),
        he: join(|segment| segment.he.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn genesis_metadata() -> SectionMetadata {
        serde_json::from_value(json!({
            "sectionRef": "Genesis 1",
            "versions": [
                {"versionTitle": "The Koren Jerusalem Bible", "language": "en"},
                {"versionTitle": "Tanach with Ta'amei Hamikra", "language": "he"}
            ],
            "links": [[{"sourceRef": "Rashi on Genesis 1:1:1"}], null]
        }))
        .unwrap()
    }

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn segments_follow_the_longest_language() {
        let mut loaded = LoadedTexts::new();
        loaded.insert(Language::En, ("The Koren Jerusalem Bible".to_string(), lines(&["In the beginning", "And the earth"])));
        loaded.insert(Language::He, ("Tanach with Ta'amei Hamikra".to_string(), lines(&["בראשית", "והארץ", "ויאמר"])));

        let section = current("Genesis 1:2", &genesis_metadata(), loaded, Vec::new());

        assert_eq!(section.content.len(), 3);
        assert_eq!(section.content[0].links, vec![json!({"sourceRef": "Rashi on Genesis 1:1:1"})]);
        assert!(section.content[1].links.is_empty());
        assert_eq!(section.content[2].segment_number, "3");
        assert_eq!(section.content[2].text, "");
        assert_eq!(section.content[2].he, "ויאמר");
        assert!(!section.is_section_level);
        assert!(!section.is_partial());
        assert_eq!(section.current_versions.get(&Language::He).map(String::as_str), Some("Tanach with Ta'amei Hamikra"));
    }

    #[test]
    fn sections_object_is_searched_in_candidate_order() {
        let data = json!({"sections": {"Rashi on Genesis 1:1": ["a"], "Rashi on Genesis 1:2": ["b"]}});
        let candidates = vec!["Rashi on Genesis 1:1:1".to_string(), "Rashi on Genesis 1:1".to_string()];
        let (key, section) = select_section(&data, &candidates).unwrap();
        assert_eq!(key, Some("Rashi on Genesis 1:1"));
        assert_eq!(section, &json!(["a"]));

        assert!(select_section(&data, &["Rashi on Genesis 1:9".to_string()]).is_none());
        let plain = json!(["a"]);
        assert_eq!(select_section(&plain, &[]), Some((None, &plain)));
    }

    #[test]
    fn legacy_content_is_adapted() {
        let stored: LegacySection = serde_json::from_value(json!({
            "sectionRef": "Pirkei Avot 1",
            "versionTitle": "Sefaria Community Translation",
            "content": [
                {"text": "Moses received", "he": "משה קבל", "links": [{"sourceRef": "Bartenura on Pirkei Avot 1:1:1"}]},
                {"segmentNumber": 2, "text": "Shimon"}
            ]
        }))
        .unwrap();

        let section = legacy("Pirkei Avot 1", &stored);

        assert_eq!(section.source, SectionSource::Legacy);
        assert!(section.is_section_level);
        assert_eq!(section.content[0].segment_number, "1");
        assert_eq!(section.content[0].links.len(), 1);
        assert_eq!(section.content[1].segment_number, "2");
        assert_eq!(section.content[1].he, "");
        assert_eq!(
            section.current_versions.get(&Language::En).map(String::as_str),
            Some("Sefaria Community Translation")
        );
    }

    #[rstest]
    #[case("Genesis 1", "In the beginning And the earth", "בראשית והארץ ויאמר")]
    #[case("Genesis 1:2", "And the earth", "והארץ")]
    #[case("Genesis 1:2-3", "And the earth", "והארץ ויאמר")]
    #[case("Genesis 1:7", "", "")]
    #[case("Genesis 1:x", "", "")]
    fn joined_text(#[case] requested: &str, #[case] en: &str, #[case] he: &str) {
        let mut loaded = LoadedTexts::new();
        loaded.insert(Language::En, ("The Koren Jerusalem Bible".to_string(), lines(&["In the beginning", "And the earth"])));
        loaded.insert(Language::He, ("Tanach with Ta'amei Hamikra".to_string(), lines(&["בראשית", "והארץ", "ויאמר"])));
        let section = current(requested, &genesis_metadata(), loaded, Vec::new());

        let text = ref_text(&section);

        assert_eq!(text.section_ref, "Genesis 1");
        assert_eq!(text.en, en);
        assert_eq!(text.he, he);
    }
}
