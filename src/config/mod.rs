//! Project configuration for `scad-live.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── compiler   # [compiler]
//! │   ├── worker     # [worker]
//! │   ├── schedule   # [schedule]
//! │   ├── render     # [render]
//! │   └── diagnostics# [diagnostics]
//! ├── error          # ConfigError
//! ├── util           # Config file discovery
//! └── mod.rs         # LiveConfig (this file)
//! ```
//!
//! Every section is optional; a missing file means all defaults.

pub mod section;
mod error;
mod util;

pub use error::ConfigError;
pub use section::{CompilerConfig, DiagnosticsConfig, RenderConfig, ScheduleConfig, WorkerConfig};
pub use util::find_config_file;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::log;

/// Root configuration structure representing scad-live.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Absolute path to the config file, if one was found (internal use only)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Project root: the config file's directory, else the working directory (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl LiveConfig {
    /// Locate `config_name` upward from `cwd` and load it.
    ///
    /// No config file is not an error: defaults apply with `cwd` as root.
    pub fn load(cwd: &Path, config_name: &Path) -> Result<Self, ConfigError> {
        let mut config = match find_config_file(cwd, config_name) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.root = path.parent().map_or_else(|| cwd.to_path_buf(), Path::to_path_buf);
                config.config_path = Some(path);
                config
            }
            None => {
                crate::debug!("config"; "no {} found, using defaults", config_name.display());
                Self {
                    root: cwd.to_path_buf(),
                    ..Self::default()
                }
            }
        };
        config.compiler.program = config.compiler.program.trim().to_owned();
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {field}");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.render.validate()?;
        if self.compiler.program.trim().is_empty() {
            return Err(ConfigError::Validation("compiler.program must not be empty".into()));
        }
        Ok(())
    }
}

/// Parse a test config, failing on unknown fields.
#[cfg(test)]
pub fn test_parse_config(content: &str) -> LiveConfig {
    let (parsed, ignored) = LiveConfig::parse_with_ignored(content).unwrap();
    assert!(ignored.is_empty(), "test config has unknown fields: {ignored:?}");
    parsed
}
