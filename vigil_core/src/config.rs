use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Engine settings, handed to the engine at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attach error source chains to the `exception_trace` token.
    pub verbose: bool,
    /// Read remote scripts back after transfer and check their digest.
    pub echo_remote_scripts: bool,
    /// Command prefix for the remote CLI, e.g. `drush @prod`.
    pub gateway: String,
    /// Template used to run a transferred script. Placeholders: `{gateway}`, `{path}`.
    pub interpreter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            echo_remote_scripts: false,
            gateway: "drush".to_string(),
            interpreter: "{gateway} php-script {path}".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: EngineConfig = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = gateway.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
