use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::broker::{AmqpSettings, ReplyRouting};
use crate::decoder::{DecoderEndpoint, ReconnectPolicy};
use crate::language_utils::LanguagePair;
use crate::task::{HandlerConfig, PoolConfig};

/// Application configuration module
/// This module holds the worker configuration assembled from the command
/// line and environment, and derives the settings of each component from it.
/// Represents the worker configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Directory holding one subdirectory per model
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Model name, a `src-trg` language pair (e.g. `de-en`)
    pub model: String,

    /// Message broker settings
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Job processing settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Decoder engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Message broker configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerConfig {
    /// Broker URL
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Exchange requests are bound to
    #[serde(default)]
    pub request_exchange: String,

    /// Queue jobs are consumed from; also the heartbeat target
    #[serde(default = "default_request_queue")]
    pub request_queue: String,

    /// Exchange for replies when a message names none
    #[serde(default)]
    pub response_exchange: String,

    /// Reply routing convention
    #[serde(default)]
    pub reply_routing: ReplyRouting,

    /// Seconds to wait before the first delivery is taken
    #[serde(default)]
    pub startup_delay_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            request_exchange: String::new(),
            request_queue: default_request_queue(),
            response_exchange: String::new(),
            reply_routing: ReplyRouting::default(),
            startup_delay_secs: 0,
        }
    }
}

/// Job processing configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Jobs translated in parallel
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Seconds between heartbeats while a job runs
    #[serde(default = "default_heartbeat_pause_secs")]
    pub heartbeat_pause_secs: u64,

    /// Seconds without progress after which a translation counts as hung (0 disables)
    #[serde(default = "default_restart_timeout_secs")]
    pub restart_timeout_secs: u64,

    /// Failures after which a job is rejected for good
    #[serde(default = "default_max_retries_per_job")]
    pub max_retries_per_job: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            heartbeat_pause_secs: default_heartbeat_pause_secs(),
            restart_timeout_secs: default_restart_timeout_secs(),
            max_retries_per_job: default_max_retries_per_job(),
        }
    }
}

/// Decoder engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Remote engine; when set no subprocess is started
    #[serde(default)]
    pub url: Option<String>,

    /// Engine executable; takes precedence over the one in `decoder.json`
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Seconds between connection attempts
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Connection attempts before giving up
    #[serde(default = "default_reconnect_max_tries")]
    pub reconnect_max_tries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: None,
            executable: None,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            reconnect_max_tries: default_reconnect_max_tries(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("model")
}

fn default_broker_url() -> String {
    "amqp://localhost:5672".to_string()
}

fn default_request_queue() -> String {
    "requests".to_string()
}

fn default_parallel() -> usize {
    1
}

fn default_heartbeat_pause_secs() -> u64 {
    10
}

fn default_restart_timeout_secs() -> u64 {
    5 * 60
}

fn default_max_retries_per_job() -> u32 {
    3
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_reconnect_max_tries() -> u32 {
    720
}

impl Config {
    /// Create a configuration for a model with every other setting defaulted
    pub fn new(model_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            model: model.into(),
            broker: BrokerConfig::default(),
            worker: WorkerConfig::default(),
            engine: EngineConfig::default(),
            log_level: LogLevel::default(),
        }
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        self.language_pair()?;

        Url::parse(&self.broker.url).with_context(|| format!("Invalid broker URL '{}'", self.broker.url))?;

        if self.worker.parallel == 0 {
            return Err(anyhow!("Parallelism must be at least 1"));
        }
        if self.worker.heartbeat_pause_secs == 0 {
            return Err(anyhow!("Heartbeat pause must be at least one second"));
        }
        if self.worker.max_retries_per_job == 0 {
            return Err(anyhow!("Max retries per job must be at least 1"));
        }
        if self.engine.reconnect_max_tries == 0 {
            return Err(anyhow!("Reconnect max tries must be at least 1"));
        }

        self.decoder_endpoint()?;
        Ok(())
    }

    /// Language pair named by the model
    pub fn language_pair(&self) -> Result<LanguagePair> {
        self.model
            .parse::<LanguagePair>()
            .with_context(|| format!("Model name '{}' is not a language pair", self.model))
    }

    /// Remote engine endpoint, if one is configured
    pub fn decoder_endpoint(&self) -> Result<Option<DecoderEndpoint>> {
        self.engine
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| url.parse::<DecoderEndpoint>().with_context(|| format!("Invalid decoder URL '{}'", url)))
            .transpose()
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.engine.reconnect_max_tries,
            delay: Duration::from_secs(self.engine.reconnect_delay_secs),
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            response_exchange: self.broker.response_exchange.clone(),
            routing: self.broker.reply_routing,
            heartbeat_queue: self.broker.request_queue.clone(),
            heartbeat_interval: Duration::from_secs(self.worker.heartbeat_pause_secs),
            max_retries: self.worker.max_retries_per_job,
        }
    }

    /// Broker connection and topology, one prefetched delivery per slot
    pub fn amqp_settings(&self) -> AmqpSettings {
        AmqpSettings {
            url: self.broker.url.clone(),
            request_queue: self.broker.request_queue.clone(),
            request_exchange: self.broker.request_exchange.clone(),
            response_exchange: self.broker.response_exchange.clone(),
            prefetch: u16::try_from(self.worker.parallel).unwrap_or(u16::MAX),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            parallel: self.worker.parallel,
            restart_timeout: match self.worker.restart_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            startup_delay: Duration::from_secs(self.broker.startup_delay_secs),
        }
    }
}
