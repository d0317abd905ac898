//! `[render]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [render]
//! format = "stl"                 # export format, also the output extension
//! features = ["manifold"]        # passed as --enable=<feature>
//! preamble = "$fn = 64;"         # prepended to the source; diagnostics are shifted back
//! ```

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub format: String,
    pub features: Vec<String>,
    pub preamble: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            format: "stl".into(),
            features: Vec::new(),
            preamble: String::new(),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = !self.format.is_empty() && self.format.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(ConfigError::Validation(format!(
                "render.format `{}` must be a plain extension like `stl` or `3mf`",
                self.format
            )));
        }
        Ok(())
    }
}
