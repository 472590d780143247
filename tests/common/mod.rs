/*!
 * Common test utilities for the mtworker test suite
 */

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use mtworker::decoder::{Connector, DecoderConnection, DecoderEndpoint};
use mtworker::errors::DecoderError;

/// Routes library logging to the test output; safe to call repeatedly
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Writes a `de-en` model with local-only pipelines under `root`
pub fn create_test_model(root: &Path) -> Result<PathBuf> {
    let dir = root.join("de-en");
    fs::create_dir_all(&dir)?;
    create_test_file(
        &dir,
        "preprocess.json",
        r#"[
            {"action": "normalize-unicode", "form": "NFC"},
            {"action": "normalize-whitespace"},
            {"action": "split-dates"}
        ]"#,
    )?;
    create_test_file(
        &dir,
        "postprocess.json",
        r#"{"steps": [{"action": "de-subword-segment"}, {"action": "fix-quotes"}]}"#,
    )?;
    Ok(dir)
}

/// A document with one instance in `language`
pub fn test_document(language: &str, sentences: &[&str]) -> serde_json::Value {
    let sentences: Vec<serde_json::Value> = sentences
        .iter()
        .map(|sentence| {
            let tokens: Vec<serde_json::Value> = sentence
                .split_whitespace()
                .enumerate()
                .map(|(offset, token)| serde_json::json!({"token": {"offset": offset, "token": token}, "features": []}))
                .collect();
            serde_json::json!({"tokens": tokens})
        })
        .collect();

    serde_json::json!({
        "instances": [{
            "metadata": {"language": language, "id": 1},
            "body": {"sentences": sentences}
        }]
    })
}

/// Engine stand-in that reverses the words of every line.
///
/// Requests can be slowed down with `delay` to simulate long translations.
/// While `drops` is positive each `recv` consumes one and fails as if the
/// peer had reset the connection.
pub struct ReverseEngine {
    delay: Duration,
    pending: Option<String>,
    drops: Arc<AtomicU32>,
    requests: Arc<AtomicU32>,
}

#[async_trait]
impl DecoderConnection for ReverseEngine {
    async fn send(&mut self, text: &str) -> Result<(), DecoderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let reversed: Vec<String> = text
            .split('\n')
            .map(|line| line.split(' ').rev().collect::<Vec<_>>().join(" "))
            .collect();
        self.pending = Some(reversed.join("\n"));
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, DecoderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let dropped = self
            .drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if dropped {
            self.pending = None;
            return Err(DecoderError::Connection("connection reset by peer".to_string()));
        }
        self.pending.take().ok_or(DecoderError::NotConnected)
    }
}

/// Connector handing out [`ReverseEngine`]s after `failures` refused attempts
pub struct ReverseConnector {
    pub delay: Duration,
    pub failures: u32,
    pub attempts: AtomicU32,
    drops: Arc<AtomicU32>,
    requests: Arc<AtomicU32>,
}

impl ReverseConnector {
    pub fn new() -> Arc<Self> {
        Self::flaky(0)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, 0, 0)
    }

    pub fn flaky(failures: u32) -> Arc<Self> {
        Self::build(Duration::ZERO, failures, 0)
    }

    /// Connections open fine but the first `drops` responses are lost
    pub fn dropping(drops: u32) -> Arc<Self> {
        Self::build(Duration::ZERO, 0, drops)
    }

    fn build(delay: Duration, failures: u32, drops: u32) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failures,
            attempts: AtomicU32::new(0),
            drops: Arc::new(AtomicU32::new(drops)),
            requests: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Connection attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Requests sent over any connection so far
    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ReverseConnector {
    async fn connect(&self, _endpoint: &DecoderEndpoint) -> Result<Box<dyn DecoderConnection>, DecoderError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(DecoderError::Connection(format!("refused (attempt {})", attempt)));
        }
        Ok(Box::new(ReverseEngine {
            delay: self.delay,
            pending: None,
            drops: self.drops.clone(),
            requests: self.requests.clone(),
        }))
    }
}
