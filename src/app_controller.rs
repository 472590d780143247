use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::app_config::Config;
use crate::broker::{Broker, MemoryBroker};
use crate::database::TruecaseDictionary;
use crate::decoder::{Connector, DecoderEndpoint, DecoderLaunch, DecoderProcess, WsConnector};
use crate::session::ModelSession;
use crate::task::{JobReply, TaskHandler, Worker, WorkerStats};
use crate::translation::{Document, SessionTranslators, Translate, TranslatorFactory};

// @module: Application controller wiring model, engine, broker and worker

/// Engine executable used when neither the command line nor `decoder.json` names one
pub const DEFAULT_ENGINE_EXECUTABLE: &str = "marian-server";

/// Routing key of replies produced by single task runs
const TASK_ROUTING_KEY: &str = "task";

/// Main application controller for the translation worker
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Loaded model, shared by every translator
    session: Arc<ModelSession>,
    // @field: Opens engine connections
    connector: Arc<dyn Connector>,
    // @field: Engine subprocess; absent when a remote engine is used
    engine: Option<Arc<Mutex<DecoderProcess>>>,
    // @field: Where translators connect to
    endpoint: DecoderEndpoint,
}

impl Controller {
    // @method: Load the configured model and prepare (but not start) the engine
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;

        let session = ModelSession::load(&config.model_dir, &config.model).with_context(|| {
            format!(
                "Failed to load model '{}' from {}",
                config.model,
                config.model_dir.display()
            )
        })?;

        Self::with_session(config, Arc::new(session))
    }

    /// Create a controller around an already loaded model
    pub fn with_session(config: Config, session: Arc<ModelSession>) -> Result<Self> {
        let (engine, endpoint) = match config.decoder_endpoint()? {
            Some(endpoint) => {
                info!("Using remote decoder at {}", endpoint);
                (None, endpoint)
            }
            None => {
                let executable = config
                    .engine
                    .executable
                    .clone()
                    .or_else(|| session.decoder().executable.as_ref().map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_EXECUTABLE));
                let launch = DecoderLaunch::from_config(&executable, session.decoder(), session.model_dir());
                let process = DecoderProcess::new(launch);
                let endpoint = process.endpoint();
                (Some(Arc::new(Mutex::new(process))), endpoint)
            }
        };

        Ok(Self {
            config,
            session,
            connector: Arc::new(WsConnector),
            engine,
            endpoint,
        })
    }

    /// Replace the engine connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<ModelSession> {
        &self.session
    }

    pub fn endpoint(&self) -> &DecoderEndpoint {
        &self.endpoint
    }

    /// Whether this controller owns an engine subprocess
    pub fn manages_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Start the engine subprocess, if there is one
    pub async fn start(&self) -> Result<()> {
        if let Some(engine) = &self.engine {
            engine.lock().await.start().await.context("Failed to start decoder engine")?;
        }
        Ok(())
    }

    /// Stop the engine subprocess, if there is one
    pub async fn shutdown(&self) {
        if let Some(engine) = &self.engine {
            engine.lock().await.stop().await;
        }
    }

    /// Factory for translators bound to this model and engine
    pub fn translators(&self) -> Arc<SessionTranslators> {
        Arc::new(SessionTranslators::new(
            self.session.clone(),
            self.endpoint.clone(),
            self.connector.clone(),
            self.config.reconnect_policy(),
        ))
    }

    /// Consume jobs from `broker` until it is drained
    pub async fn run_worker(&self, broker: Arc<dyn Broker>) -> Result<WorkerStats> {
        let handler = TaskHandler::new(broker, self.config.handler_config(), self.session.source_language());
        let mut worker = Worker::new(Arc::new(handler), self.translators(), self.config.pool_config());
        if let Some(engine) = &self.engine {
            worker = worker.with_engine(engine.clone());
        }

        let stats = worker.run().await.context("Worker stopped")?;
        Ok(stats)
    }

    /// Run a single job through the full handler and return its reply.
    ///
    /// `body` is either a complete job message or bare task data; bare data
    /// is wrapped and declared to be in the model's source language.
    pub async fn run_task(&self, body: &[u8]) -> Result<JobReply> {
        let start = Instant::now();
        let message = task_message(body, self.session.source_language())?;

        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue(&self.config.broker.request_queue);
        broker.push_body(message.to_string());
        broker.close();

        let stats = self.run_worker(broker.clone()).await?;
        let published = broker.published();
        let reply = published.first().ok_or_else(|| {
            anyhow!(
                "Job was not answered ({} rejected, {} unacknowledged)",
                stats.rejected,
                stats.unacknowledged
            )
        })?;

        info!("Task finished in {:?}", start.elapsed());
        serde_json::from_slice(&reply.body).context("Reply is not a valid job reply")
    }

    /// Create one connected translator
    pub async fn translator(&self) -> Result<Box<dyn Translate>> {
        let translator = self.translators().create().await.context("Failed to create translator")?;
        Ok(translator)
    }

    /// Translate plain text or a JSON document.
    ///
    /// With `lines`, every line of text is translated on its own.
    pub async fn translate_input(translator: &mut dyn Translate, input: &str, lines: bool) -> Result<String> {
        if input.trim_start().starts_with('{') {
            let document: Document = serde_json::from_str(input).context("Input is not a valid document")?;
            let translated = translator.translate_document(document).await?;
            return Ok(serde_json::to_string_pretty(&translated)?);
        }

        if !lines {
            return Ok(translator.translate_text(input).await?);
        }

        let mut output = Vec::new();
        for line in input.lines() {
            if line.trim().is_empty() {
                output.push(String::new());
            } else {
                output.push(translator.translate_text(line).await?);
            }
        }
        Ok(output.join("\n"))
    }

    /// Build the truecase database for a frequency list ahead of deployment
    pub fn build_truecase(model: &Path) -> Result<PathBuf> {
        let (source, db_path) = TruecaseDictionary::resolve_paths(model);
        if db_path.exists() {
            info!("Truecase database {} already exists", db_path.display());
            return Ok(db_path);
        }

        let entries = TruecaseDictionary::build(&source, &db_path)
            .with_context(|| format!("Failed to build truecase database from {}", source.display()))?;
        info!("Wrote {} entries to {}", entries, db_path.display());
        Ok(db_path)
    }
}

/// Turn the contents of a task file into a job message
fn task_message(body: &[u8], source_language: &str) -> Result<Value> {
    let value: Value = serde_json::from_slice(body).context("Task file is not valid JSON")?;

    let mut message = match value {
        Value::Object(map) if map.contains_key("taskData") => Value::Object(map),
        data => json!({
            "taskData": data,
            "taskMetadata": {"taskSpecificMetadata": {"contentDetectedLangCode": source_language}},
        }),
    };

    if message.get("replyToRoutingKeys").is_none() {
        debug!("Task names no reply target, using '{}'", TASK_ROUTING_KEY);
        message["replyToRoutingKeys"] = json!({"finalResult": TASK_ROUTING_KEY});
    }
    Ok(message)
}
