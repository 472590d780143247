/*!
 * Tests for application configuration functionality
 */

use std::time::Duration;

use mtworker::app_config::{Config, LogLevel};
use mtworker::broker::ReplyRouting;

/// Test default configuration values
#[test]
fn test_newConfig_withNoOverrides_shouldHaveCorrectDefaults() {
    let config = Config::new("/models", "de-en");

    assert_eq!(config.worker.parallel, 1);
    assert_eq!(config.worker.heartbeat_pause_secs, 10);
    assert_eq!(config.worker.restart_timeout_secs, 300);
    assert_eq!(config.worker.max_retries_per_job, 3);
    assert_eq!(config.broker.request_queue, "requests");
    assert_eq!(config.broker.url, "amqp://localhost:5672");
    assert_eq!(config.broker.reply_routing, ReplyRouting::Direct);
    assert_eq!(config.engine.reconnect_max_tries, 720);
    assert!(config.engine.url.is_none());
    assert_eq!(config.log_level, LogLevel::Info);
}

/// Test configuration validation
#[test]
fn test_validate_withVariousConfigs_shouldValidateCorrectly() {
    let mut config = Config::new("/models", "de-en");
    assert!(config.validate().is_ok());

    config.model = "de".to_string();
    assert!(config.validate().is_err());
    config.model = "de-en".to_string();

    config.worker.max_retries_per_job = 0;
    assert!(config.validate().is_err());
    config.worker.max_retries_per_job = 3;

    config.engine.url = Some("ws://engine:notaport".to_string());
    assert!(config.validate().is_err());
    config.engine.url = Some("ws://engine:8080".to_string());
    assert!(config.validate().is_ok());
}

/// Derived component settings follow the configuration
#[test]
fn test_derivedSettings_shouldFollowConfig() {
    let mut config = Config::new("/models", "de-en");
    config.broker.request_queue = "mt-in".to_string();
    config.broker.response_exchange = "mt-out".to_string();
    config.broker.reply_routing = ReplyRouting::Headers;
    config.broker.startup_delay_secs = 2;
    config.worker.parallel = 4;
    config.worker.heartbeat_pause_secs = 3;
    config.engine.reconnect_delay_secs = 1;
    config.engine.reconnect_max_tries = 7;

    let handler = config.handler_config();
    assert_eq!(handler.heartbeat_queue, "mt-in");
    assert_eq!(handler.response_exchange, "mt-out");
    assert_eq!(handler.routing, ReplyRouting::Headers);
    assert_eq!(handler.heartbeat_interval, Duration::from_secs(3));

    let pool = config.pool_config();
    assert_eq!(pool.parallel, 4);
    assert_eq!(pool.startup_delay, Duration::from_secs(2));

    let policy = config.reconnect_policy();
    assert_eq!(policy.max_attempts, 7);
    assert_eq!(policy.delay, Duration::from_secs(1));
}

/// Configuration can be read from JSON with defaults filled in
#[test]
fn test_deserialize_withPartialJson_shouldFillDefaults() {
    let config: Config = serde_json::from_str(
        r#"{"model_dir": "/srv/models", "model": "en-de", "worker": {"parallel": 2}}"#,
    )
    .unwrap();

    assert_eq!(config.worker.parallel, 2);
    assert_eq!(config.worker.heartbeat_pause_secs, 10);
    assert_eq!(config.language_pair().unwrap().source, "en");
}
