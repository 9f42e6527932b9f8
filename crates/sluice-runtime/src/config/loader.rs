//! Layered configuration loading with figment.
//!
//! # Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile file (`sluice.{profile}.toml` / `sluice.{profile}.yaml`)
//! 3. Main file (`sluice.toml` / `sluice.yaml`)
//! 4. `SLUICE_*` environment variables
//! 5. Programmatic [`ConfigLoader::merge`]
//!
//! Which file formats are searched is controlled by the `toml-config` and
//! `yaml-config` features.
//!
//! # Environment variables
//!
//! The `SLUICE_` prefix is stripped and `__` separates nesting levels:
//!
//! - `SLUICE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `SLUICE_HOST__NAME=vercel` → `host.name = "vercel"`
//! - `SLUICE_WEBHOOK__ENABLED=true` → `webhook.enabled = true`
//!
//! The profile itself comes from `SLUICE_PROFILE`.

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace};

use super::error::{ConfigError, ConfigResult};
use super::schema::SluiceConfig;

const ENV_PREFIX: &str = "SLUICE_";
const PROFILE_VAR: &str = "SLUICE_PROFILE";

/// Configuration profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `SLUICE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a [`SluiceConfig`] from every configured source.
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .profile("production")
///     .file("deploy/sluice.toml")
///     .load()?;
/// ```
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/sluice` to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("sluice")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges values on top of every other source.
    pub fn merge(mut self, config: SluiceConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    pub fn load(self) -> ConfigResult<SluiceConfig> {
        let profile = self.profile.clone();
        let config: SluiceConfig = self.build_figment()?.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let files = match self.config_file.take() {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path)),
            Some(path) => vec![path],
            None => self.discover_files(),
        };

        let mut figment = Figment::from(Serialized::defaults(SluiceConfig::default()));
        for path in &files {
            info!(path = %path.display(), "Loading configuration file");
            figment = merge_file(figment, path)?;
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }

        let programmatic = std::mem::take(&mut self.figment);
        Ok(figment.merge(programmatic))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("sluice")))
            .collect()
    }

    /// For each enabled extension, the first search dir holding a main file
    /// contributes its profile file (if any) followed by the main file.
    fn discover_files(&self) -> Vec<PathBuf> {
        let dirs = self.search_dirs();
        let mut files = Vec::new();

        for ext in enabled_extensions() {
            let main_dir = dirs.iter().find(|dir| dir.join(format!("sluice.{ext}")).exists());
            let Some(dir) = main_dir else { continue };

            let profile_file = dir.join(format!("sluice.{}.{ext}", self.profile));
            if profile_file.exists() {
                debug!(path = %profile_file.display(), "Found profile configuration");
                files.push(profile_file);
            }
            files.push(dir.join(format!("sluice.{ext}")));
        }

        if files.is_empty() {
            debug!(paths = ?dirs, "No configuration file found, using defaults");
        }
        files
    }
}

fn enabled_extensions() -> Vec<&'static str> {
    let mut extensions = Vec::new();
    if cfg!(feature = "toml-config") {
        extensions.push("toml");
    }
    if cfg!(feature = "yaml-config") {
        extensions.extend(["yaml", "yml"]);
    }
    extensions
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => {
            drop(figment);
            Err(ConfigError::UnsupportedFormat(ext.to_string()))
        }
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<SluiceConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus the environment.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<SluiceConfig> {
    ConfigLoader::new().file(path).load()
}
