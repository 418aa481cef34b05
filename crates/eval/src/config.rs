//! Engine settings, read from TOML.

use std::path::Path;

use serde::Deserialize;

use crate::cas::CasFailurePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime knobs shared by item and test sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Template processing runs before giving up on a failing constraint.
    pub template_processing_limit: u32,
    /// Seed for template randomisation, selection and ordering.
    pub random_seed: Option<u64>,
    pub cas_failure_policy: CasFailurePolicy,
    /// maxAttempts for items no itemSessionControl applies to.
    pub default_max_attempts: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            template_processing_limit: 100,
            random_seed: None,
            cas_failure_policy: CasFailurePolicy::NullWithWarning,
            default_max_attempts: 1,
        }
    }
}

impl EngineSettings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
