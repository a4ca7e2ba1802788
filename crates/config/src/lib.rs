//! Configuration for the offline library.
//!
//! Values are layered with [`figment`]: built-in defaults, then an optional
//! TOML file, then `FOLIO_`-prefixed environment variables (nested keys are
//! separated with `__`, e.g. `FOLIO_SYNC__BUNDLE_MAX_RETRIES=3`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "FOLIO_";
const CONFIG_FILE: &str = "folio.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Archive store: one `<title>.zip` per document plus the manifests.
    pub library_dir: PathBuf,
    /// Unpacked JSON fragments served to the reader.
    pub documents_dir: PathBuf,
    /// Bundles in flight. Emptied after every download.
    pub tmp_dir: PathBuf,
    /// SQLite file holding selections and update bookkeeping.
    pub state_path: PathBuf,
    pub server: ServerConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    /// Export schema the client understands. A change purges the library.
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Days between automatic update checks.
    pub update_interval_days: u32,
    /// How much newer the remote export must be before a local archive
    /// counts as stale.
    pub staleness_tolerance_hours: u32,
    /// Extra bundle requests while the server is still preparing.
    pub bundle_max_retries: u32,
    pub bundle_retry_delay_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { base_url: "https://readonly.sefaria.org".to_string(), schema_version: "7".to_string() }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_interval_days: 7,
            staleness_tolerance_hours: 6,
            bundle_max_retries: 10,
            bundle_retry_delay_ms: 3000,
            progress_interval_ms: 100,
        }
    }
}

impl SyncConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval_days) * 24 * 60 * 60)
    }

    pub fn staleness_tolerance(&self) -> Duration {
        Duration::from_secs(u64::from(self.staleness_tolerance_hours) * 60 * 60)
    }

    pub fn bundle_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bundle_retry_delay_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Config {
    /// Every directory placed below `root`, everything else default.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            library_dir: root.join("library"),
            documents_dir: root.join("documents"),
            tmp_dir: root.join("tmp"),
            state_path: root.join("state.sqlite"),
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    /// Defaults derived from the platform's per-user directories.
    pub fn platform_defaults() -> Result<Self> {
        let dirs = Self::project_dirs()?;
        Ok(Self {
            tmp_dir: dirs.cache_dir().join("tmp"),
            ..Self::rooted(dirs.data_dir())
        })
    }

    /// Path of the config file used when none is given explicitly.
    pub fn default_file() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join(CONFIG_FILE))
    }

    /// Load configuration from platform defaults, `file` (or the default
    /// config file) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = match file {
            Some(file) => file.to_path_buf(),
            None => Self::default_file()?,
        };
        Self::load_with(Self::platform_defaults()?, &file)
    }

    /// Like [`load`](Self::load) with explicit defaults. A missing file is
    /// not an error.
    pub fn load_with(defaults: Self, file: &Path) -> Result<Self> {
        tracing::debug!(file = %file.display(), "loading configuration");
        let config: Self = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Extract)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for dir in [&self.library_dir, &self.documents_dir, &self.tmp_dir, &self.state_path] {
            if !dir.is_absolute() {
                exn::bail!(ErrorKind::RelativePath(dir.clone()));
            }
        }
        if self.sync.update_interval_days == 0 {
            exn::bail!(ErrorKind::InvalidValue("sync.update_interval_days"));
        }
        if self.server.schema_version.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidValue("server.schema_version"));
        }
        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("org", "folio", "folio").ok_or_raise(|| ErrorKind::NoProjectDirs)
    }
}
