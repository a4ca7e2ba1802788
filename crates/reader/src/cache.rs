use crate::assemble::{self, LoadedTexts};
use crate::error::{ErrorKind, Result};
use crate::models::{Language, LegacySection, RefText, Section, SectionMetadata, VersionInfo, VersionSelection};
use crate::refs;
use exn::{OptionExt, ResultExt};
use folio_storage::BackendHandle;
use folio_storage::error::ErrorKind as StorageErrorKind;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

const INDEX_SUFFIX: &str = "_index.json";

type TextKey = (String, Language, String);
type SectionKey = (String, VersionSelection, bool);

/// Where the section for a ref lives on disk, resolved once per ref.
#[derive(Debug)]
enum SectionFile {
    Current { stem: String, metadata: SectionMetadata },
    Legacy(LegacySection),
}
impl SectionFile {
    fn versions(&self) -> &[VersionInfo] {
        match self {
            Self::Current { metadata, .. } => &metadata.versions,
            Self::Legacy(legacy) => &legacy.versions,
        }
    }
}

/// Read side of the offline library.
///
/// Resolves refs to titles, unpacks title archives from the archive store
/// into the documents tree on first use, and assembles sections from the
/// unpacked files. Every stage is cached for the lifetime of the value and
/// never invalidated: unpacked files do not change while the process runs.
/// Concurrent misses may populate the same entry twice, the first insert
/// wins.
pub struct ContentCache {
    archives: BackendHandle,
    documents: BackendHandle,
    titles: RwLock<Option<Arc<BTreeSet<String>>>>,
    /// Per title flag, set once the title's files are in the documents
    /// tree. Locked for the duration of an unpack.
    unpacked: Mutex<HashMap<String, Arc<Mutex<bool>>>>,
    files: RwLock<HashMap<String, Arc<SectionFile>>>,
    texts: RwLock<HashMap<TextKey, Arc<Value>>>,
    sections: RwLock<HashMap<SectionKey, Arc<Section>>>,
}

impl ContentCache {
    pub fn new(archives: BackendHandle, documents: BackendHandle) -> Self {
        Self {
            archives,
            documents,
            titles: RwLock::new(None),
            unpacked: Mutex::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            texts: RwLock::new(HashMap::new()),
            sections: RwLock::new(HashMap::new()),
        }
    }

    /// Use a known title list instead of discovering titles from storage.
    pub fn with_titles(mut self, titles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let titles = titles.into_iter().map(Into::into).collect();
        self.titles = RwLock::new(Some(Arc::new(titles)));
        self
    }

    /// Rediscover titles from storage, after a sync added or removed some.
    pub async fn refresh_titles(&self) -> Result<usize> {
        let titles = Arc::new(self.discover_titles().await?);
        let count = titles.len();
        *self.titles.write().await = Some(titles);
        Ok(count)
    }

    /// Load and assemble the section containing `reference`.
    ///
    /// `versions` holds explicitly requested version titles per language;
    /// slots without an entry use the first version the metadata lists for
    /// that language. With `fallback`, a requested version that cannot be
    /// loaded is replaced by the default one. Languages that still fail are
    /// listed in [`Section::missing_languages`]; only when no language loads
    /// at all is the last error returned.
    ///
    /// Returns [`MissingOfflineData`](ErrorKind::MissingOfflineData) when the
    /// ref is not available offline and the caller should use the network.
    #[instrument(skip(self, versions), fields(versions = versions.len()))]
    pub async fn load_text_offline(&self, reference: &str, versions: &VersionSelection, fallback: bool) -> Result<Arc<Section>> {
        let key = (reference.to_string(), versions.clone(), fallback);
        if let Some(section) = self.sections.read().await.get(&key) {
            return Ok(Arc::clone(section));
        }

        let titles = self.titles().await?;
        let file = self.section_file(&titles, reference).await?;
        let section = match file.deref() {
            SectionFile::Current { stem, metadata } => {
                self.assemble_current(&titles, reference, stem, metadata, versions, fallback).await?
            },
            SectionFile::Legacy(_) if !versions.is_empty() => {
                tracing::debug!(reference, "explicit versions requested for a legacy section");
                exn::bail!(ErrorKind::MissingOfflineData(reference.to_string()));
            },
            SectionFile::Legacy(legacy) => assemble::legacy(reference, legacy),
        };

        let mut sections = self.sections.write().await;
        Ok(Arc::clone(sections.entry(key).or_insert_with(|| Arc::new(section))))
    }

    /// Text of the segment, segment range or section `reference` names, in
    /// the requested versions with fallback enabled.
    pub async fn text_for_ref(&self, reference: &str, versions: &VersionSelection) -> Result<RefText> {
        let section = self.load_text_offline(reference, versions, true).await?;
        Ok(assemble::ref_text(&section))
    }

    /// Whether the title owning `reference` is stored offline, packed or
    /// unpacked.
    pub async fn offline_title_exists(&self, reference: &str) -> Result<bool> {
        let titles = self.titles().await?;
        let Some(title) = resolve_title(&titles, reference) else {
            return Ok(false);
        };
        if self.archives.exists(&refs::archive_path(title)).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(true);
        }
        self.documents.exists(&refs::index_path(title)).await.or_raise(|| ErrorKind::Storage)
    }

    /// Versions the metadata of the section containing `reference` lists.
    pub async fn versions_available(&self, reference: &str) -> Result<Vec<VersionInfo>> {
        let titles = self.titles().await?;
        let file = self.section_file(&titles, reference).await?;
        Ok(file.versions().to_vec())
    }

    /// Table of contents of a title, unpacking it first if needed.
    #[instrument(skip(self))]
    pub async fn load_text_toc(&self, title: &str) -> Result<Value> {
        self.materialize(title).await?;
        let path = refs::index_path(title);
        self.read_json(&path).await?.ok_or_raise(|| ErrorKind::MissingOfflineData(title.to_string()))
    }

    async fn titles(&self) -> Result<Arc<BTreeSet<String>>> {
        if let Some(titles) = self.titles.read().await.as_ref() {
            return Ok(Arc::clone(titles));
        }
        let discovered = Arc::new(self.discover_titles().await?);
        let mut titles = self.titles.write().await;
        Ok(Arc::clone(titles.get_or_insert(discovered)))
    }

    /// Titles with an archive in the archive store or an index in the
    /// documents tree.
    async fn discover_titles(&self) -> Result<BTreeSet<String>> {
        let mut titles = BTreeSet::new();
        for info in self.archives.list(None).await.or_raise(|| ErrorKind::Storage)? {
            if let Some(title) = info.top_level_stem("zip") {
                titles.insert(title.to_string());
            }
        }
        for info in self.documents.list(None).await.or_raise(|| ErrorKind::Storage)? {
            if info.path.components().count() == 1
                && let Some(name) = info.path.to_str()
                && let Some(title) = name.strip_suffix(INDEX_SUFFIX)
                && !title.is_empty()
            {
                titles.insert(title.to_string());
            }
        }
        tracing::debug!(titles = titles.len(), "discovered offline titles");
        Ok(titles)
    }

    /// Unpack `<title>.zip` into the documents tree, once per title.
    ///
    /// Skipped when the title's index is already present. A missing archive
    /// is not an error and is not remembered, the title may be downloaded
    /// later.
    async fn materialize(&self, title: &str) -> Result<()> {
        let slot = Arc::clone(self.unpacked.lock().await.entry(title.to_string()).or_default());
        let mut unpacked = slot.lock().await;
        if *unpacked {
            return Ok(());
        }
        let index = refs::index_path(title);
        if self.documents.exists(&index).await.or_raise(|| ErrorKind::Storage)? {
            *unpacked = true;
            return Ok(());
        }
        let archive = match self.archives.read(&refs::archive_path(title)).await {
            Ok(archive) => archive,
            Err(err) if matches!(err.deref(), StorageErrorKind::NotFound(_)) => {
                tracing::debug!(title, "no archive to unpack");
                return Ok(());
            },
            Err(err) => return Err(err.raise(ErrorKind::Storage)),
        };
        let files = folio_storage::unpack_into(self.documents.as_ref(), archive, None)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        tracing::info!(title, files = files.len(), "unpacked title archive");
        *unpacked = true;
        Ok(())
    }

    /// Find the file holding the section for `reference`: metadata first,
    /// then the legacy layout, each at the ref's stem and one level up.
    async fn section_file(&self, titles: &BTreeSet<String>, reference: &str) -> Result<Arc<SectionFile>> {
        if let Some(file) = self.files.read().await.get(reference) {
            return Ok(Arc::clone(file));
        }
        let title = resolve_title(titles, reference).ok_or_raise(|| ErrorKind::MissingOfflineData(reference.to_string()))?;
        self.materialize(title).await?;

        let candidates = section_candidates(titles, reference);
        let stem = refs::stem(reference);
        let file = if let Some((stem, path, data)) = self.read_at_stem(stem, refs::metadata_path).await? {
            let mut metadata: SectionMetadata = deserialize_section(&data, &candidates, reference, &path)?;
            if metadata.section_ref.is_empty() {
                metadata.section_ref = stem.clone();
            }
            SectionFile::Current { stem, metadata }
        } else if let Some((stem, path, data)) = self.read_at_stem(stem, refs::legacy_path).await? {
            let mut legacy: LegacySection = deserialize_section(&data, &candidates, reference, &path)?;
            if legacy.section_ref.is_empty() {
                legacy.section_ref = stem;
            }
            SectionFile::Legacy(legacy)
        } else {
            exn::bail!(ErrorKind::MissingOfflineData(reference.to_string()));
        };

        let mut files = self.files.write().await;
        Ok(Arc::clone(files.entry(reference.to_string()).or_insert_with(|| Arc::new(file))))
    }

    /// Read the JSON file `name(stem)`, retrying one level up when absent.
    async fn read_at_stem(&self, stem: &str, name: fn(&str) -> PathBuf) -> Result<Option<(String, PathBuf, Value)>> {
        for stem in std::iter::once(stem).chain(refs::depth_one_stem(stem)) {
            let path = name(stem);
            if let Some(data) = self.read_json(&path).await? {
                return Ok(Some((stem.to_string(), path, data)));
            }
        }
        Ok(None)
    }

    async fn assemble_current(
        &self,
        titles: &BTreeSet<String>,
        reference: &str,
        stem: &str,
        metadata: &SectionMetadata,
        requested: &VersionSelection,
        fallback: bool,
    ) -> Result<Section> {
        let candidates = section_candidates(titles, &metadata.section_ref);
        let mut loaded = LoadedTexts::new();
        let mut missing = Vec::new();
        let mut last_error = None;

        for language in Language::ALL {
            let default = metadata.default_version(language);
            let Some(wanted) = requested.get(&language).map(String::as_str).or(default) else {
                continue;
            };
            let attempt = match self.load_version(stem, &candidates, language, wanted).await {
                Ok(lines) => Ok((wanted, lines)),
                Err(err) => match default {
                    Some(default) if fallback && default != wanted => {
                        tracing::warn!(reference, %language, requested = wanted, default, "version unavailable offline, using default");
                        self.load_version(stem, &candidates, language, default)
                            .await
                            .map(|lines| (default, lines))
                    },
                    _ => Err(err),
                },
            };
            match attempt {
                Ok((title, lines)) => {
                    loaded.insert(language, (title.to_string(), lines));
                },
                Err(err) => {
                    tracing::debug!(reference, %language, "no version could be loaded for language");
                    missing.push(language);
                    last_error = Some(err);
                },
            }
        }

        if loaded.is_empty()
            && let Some(err) = last_error
        {
            return Err(err);
        }
        Ok(assemble::current(reference, metadata, loaded, missing))
    }

    async fn load_version(&self, stem: &str, candidates: &[String], language: Language, title: &str) -> Result<Vec<String>> {
        let key = (stem.to_string(), language, title.to_string());
        let path = refs::section_file_path(stem, language, title);
        let cached = self.texts.read().await.get(&key).cloned();
        let data = match cached {
            Some(data) => data,
            None => {
                let data = self
                    .read_json(&path)
                    .await?
                    .ok_or_raise(|| ErrorKind::MissingOfflineData(path.display().to_string()))?;
                let mut texts = self.texts.write().await;
                Arc::clone(texts.entry(key).or_insert_with(|| Arc::new(data)))
            },
        };
        let (_, section) = assemble::select_section(&data, candidates)
            .ok_or_raise(|| ErrorKind::CannotExtractSection(candidates.first().cloned().unwrap_or_default()))?;
        assemble::text_lines(section).ok_or_raise(|| ErrorKind::CorruptFile(path))
    }

    /// `None` when the file does not exist.
    async fn read_json(&self, path: &Path) -> Result<Option<Value>> {
        match self.documents.read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .or_raise(|| ErrorKind::CorruptFile(path.to_path_buf())),
            Err(err) if matches!(err.deref(), StorageErrorKind::NotFound(_)) => Ok(None),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }
}

fn deserialize_section<T: for<'de> Deserialize<'de>>(data: &Value, candidates: &[String], reference: &str, path: &Path) -> Result<T> {
    let (key, section) = assemble::select_section(data, candidates)
        .ok_or_raise(|| ErrorKind::CannotExtractSection(reference.to_string()))?;
    let mut section = section.clone();
    if let (Some(key), Some(object)) = (key, section.as_object_mut())
        && !object.contains_key("sectionRef")
    {
        object.insert("sectionRef".to_string(), Value::String(key.to_string()));
    }
    serde_json::from_value(section).or_raise(|| ErrorKind::CorruptFile(path.to_path_buf()))
}

/// The longest known title that prefixes `reference` at a word boundary.
pub(crate) fn resolve_title<'a>(titles: &'a BTreeSet<String>, reference: &str) -> Option<&'a str> {
    let mut candidate = reference;
    loop {
        if let Some(title) = titles.get(candidate) {
            return Some(title.as_str());
        }
        let boundary = candidate.rfind([' ', ':', ','])?;
        candidate = candidate[..boundary].trim_end_matches([' ', ',']);
    }
}

/// The ref with its last `:` level dropped, if that still names a known
/// title; otherwise the ref itself.
fn ref_up_one<'r>(titles: &BTreeSet<String>, reference: &'r str) -> &'r str {
    match reference.rsplit_once(':') {
        Some((parent, _)) if resolve_title(titles, parent).is_some() => parent,
        _ => reference,
    }
}

/// Keys a multi-section file may store the section for `reference` under.
fn section_candidates(titles: &BTreeSet<String>, reference: &str) -> Vec<String> {
    let up_one = ref_up_one(titles, reference);
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    for candidate in [
        reference.to_string(),
        up_one.to_string(),
        refs::with_missing_colon(reference).into_owned(),
        refs::with_missing_colon(up_one).into_owned(),
    ] {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}
