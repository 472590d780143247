use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Engine launch settings read from `decoder.json` in the model directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DecoderConfig {
    /// Engine config file, relative to the model directory
    #[serde(default = "default_engine_config")]
    pub config: String,

    /// Port the engine listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// CPU threads
    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default = "default_beam_size")]
    pub beam_size: usize,

    /// Engine log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Engine executable; overridden by `MARIAN_SERVER_EXE`
    #[serde(default)]
    pub executable: Option<String>,

    /// Extra command line arguments
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Readiness probes before giving up on startup
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,

    /// Milliseconds between readiness probes
    #[serde(default = "default_startup_interval_ms")]
    pub startup_interval_ms: u64,
}

fn default_engine_config() -> String {
    "decoder.yml".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn default_beam_size() -> usize {
    6
}

fn default_log_level() -> String {
    "critical".to_string()
}

fn default_startup_attempts() -> u32 {
    30
}

fn default_startup_interval_ms() -> u64 {
    1000
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            config: default_engine_config(),
            port: default_port(),
            threads: default_threads(),
            beam_size: default_beam_size(),
            log_level: default_log_level(),
            executable: None,
            extra_args: Vec::new(),
            startup_attempts: default_startup_attempts(),
            startup_interval_ms: default_startup_interval_ms(),
        }
    }
}

impl DecoderConfig {
    /// Read `decoder.json`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Absolute path of the engine config file
    pub fn config_path(&self, model_dir: &Path) -> PathBuf {
        let path = Path::new(&self.config);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            model_dir.join(path)
        }
    }

    pub fn startup_interval(&self) -> Duration {
        Duration::from_millis(self.startup_interval_ms)
    }

    /// Check values that would make the engine unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |parameter: &str, message: &str| ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            message: message.to_string(),
        };

        if self.port == 0 {
            return Err(invalid("port", "must be greater than 0"));
        }
        if self.threads == 0 {
            return Err(invalid("threads", "must be greater than 0"));
        }
        if self.beam_size == 0 {
            return Err(invalid("beam-size", "must be greater than 0"));
        }
        if self.startup_attempts == 0 {
            return Err(invalid("startup-attempts", "must be greater than 0"));
        }
        Ok(())
    }
}
