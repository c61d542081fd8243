//! Configuration loading for preroll.
//!
//! Sources are layered with `figment`, later sources overriding earlier ones:
//! 1. Built-in defaults.
//! 2. An optional configuration file (TOML, YAML or JSON, chosen by extension).
//! 3. Environment variables prefixed with `PREROLL_`, using `__` to reach
//!    nested keys (`PREROLL_POLICY__PREPARED_NEXT=2`).

pub mod error;
mod policy;

pub use crate::policy::{PreloadPolicy, REGISTRY_SLACK};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "PREROLL_";
const CACHE_DIRECTORY_NAME: &str = "video-playback-cache";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PreloadPolicy,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory exclusively owned by the download cache. Falls back to the
    /// platform cache directory when unset.
    pub directory: Option<PathBuf>,
}
impl CacheConfig {
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_directory)
    }
}

fn default_cache_directory() -> PathBuf {
    match ProjectDirs::from("", "", "preroll") {
        Some(dirs) => dirs.cache_dir().join(CACHE_DIRECTORY_NAME),
        None => std::env::temp_dir().join("preroll").join(CACHE_DIRECTORY_NAME),
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::Invalid(format!(
                    "unrecognised configuration format: {}",
                    path.display()
                ))),
            };
        }
        let config: Config =
            figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            cache = %config.cache.directory().display(),
            prepared_prev = config.policy.prepared_prev,
            prepared_next = config.policy.prepared_next,
            disk_prefetch_next = config.policy.disk_prefetch_next,
            "Loaded preload configuration",
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy.max_concurrent_prefetch == 0 {
            exn::bail!(ErrorKind::Invalid("max_concurrent_prefetch must be at least 1".to_string()));
        }
        if let Some(directory) = &self.cache.directory
            && !directory.is_absolute()
        {
            exn::bail!(ErrorKind::Invalid(format!("cache directory must be absolute: {}", directory.display())));
        }
        Ok(())
    }
}
