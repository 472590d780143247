/*!
 * Document translation.
 *
 * A translator runs one document through
 * extract → preprocess → decoder → postprocess → encode and appends the
 * result as new instances in the model's target language. Each translator
 * owns its own decoder connection, so one translator serves one job at a
 * time. Stage changes go to the job's [`Progress`] when one is attached.
 */

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;

use super::document::{Document, DocumentCodec, Instance};
use super::pipeline::Batch;
use super::progress::{Progress, Stage};
use crate::decoder::{Connector, DecoderClient, DecoderEndpoint, ReconnectPolicy};
use crate::errors::TranslateError;
use crate::session::ModelSession;

/// Something that can translate job payloads
#[async_trait]
pub trait Translate: Send {
    /// Translate every source-language instance and append the results
    async fn translate_document(&mut self, document: Document) -> Result<Document, TranslateError>;

    /// Translate plain text; output lines follow the engine's segmentation
    async fn translate_text(&mut self, text: &str) -> Result<String, TranslateError>;

    /// Source language the translator accepts
    fn source_language(&self) -> &str;

    /// Language of the instances it appends
    fn target_language(&self) -> &str;

    /// Attach the progress channel of the job about to run, or detach it
    fn set_progress(&mut self, _progress: Option<Progress>) {}
}

/// Creates one translator per translation slot
#[async_trait]
pub trait TranslatorFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Translate>, TranslateError>;
}

/// Pipeline + engine translator for one loaded model
pub struct DocumentTranslator {
    session: Arc<ModelSession>,
    client: DecoderClient,
    codec: DocumentCodec,
    progress: Option<Progress>,
}

impl DocumentTranslator {
    pub fn new(session: Arc<ModelSession>, client: DecoderClient) -> Self {
        Self {
            session,
            client,
            codec: DocumentCodec::default(),
            progress: None,
        }
    }

    pub fn with_codec(mut self, codec: DocumentCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn session(&self) -> &ModelSession {
        &self.session
    }

    pub fn client_mut(&mut self) -> &mut DecoderClient {
        &mut self.client
    }

    fn report(&self, stage: Stage) {
        if let Some(progress) = &self.progress {
            progress.stage(stage);
        }
    }

    fn job_key(&self) -> &str {
        self.progress.as_ref().map_or("-", Progress::key)
    }

    /// Run segments through preprocess, the engine and postprocess
    pub async fn translate_segments(&mut self, segments: Batch) -> Result<Batch, TranslateError> {
        self.report(Stage::Preprocessing);
        debug!("Job {}: preprocessing {} segment(s)", self.job_key(), segments.len());
        let prepared: Batch = self
            .session
            .preprocess()
            .run(segments)
            .await?
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect();

        if prepared.is_empty() {
            debug!("Job {}: nothing left to translate after preprocessing", self.job_key());
            return Ok(Vec::new());
        }

        self.report(Stage::Translating);
        debug!("Job {}: translating {} line(s)", self.job_key(), prepared.len());
        let start = Instant::now();
        let response = self.client.translate(&prepared).await?;
        debug!("Job {}: decoder answered in {:?}", self.job_key(), start.elapsed());

        self.report(Stage::Postprocessing);
        debug!("Job {}: postprocessing", self.job_key());
        let lines: Batch = response.split('\n').map(str::to_string).collect();
        let output = self
            .session
            .postprocess()
            .run(lines)
            .await?
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect();

        Ok(output)
    }

    async fn translate_instance(&mut self, instance: &Instance) -> Result<Instance, TranslateError> {
        let segments = self.codec.extract(instance);
        let translated = self.translate_segments(segments).await?;
        let sentences = self.codec.encode_all(&translated);
        Ok(instance.translated(self.session.target_language(), sentences))
    }
}

#[async_trait]
impl Translate for DocumentTranslator {
    async fn translate_document(&mut self, mut document: Document) -> Result<Document, TranslateError> {
        let start = Instant::now();
        let sources: Vec<Instance> = document
            .instances_in(self.session.source_language())
            .cloned()
            .collect();

        let mut translated = Vec::with_capacity(sources.len());
        for instance in &sources {
            translated.push(self.translate_instance(instance).await?);
        }

        info!(
            "Translated {} instance(s) {} in {:?}",
            translated.len(),
            self.session.languages(),
            start.elapsed()
        );
        document.append_instances(translated);
        Ok(document)
    }

    async fn translate_text(&mut self, text: &str) -> Result<String, TranslateError> {
        let segments: Batch = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            return Ok(String::new());
        }

        Ok(self.translate_segments(segments).await?.join("\n"))
    }

    fn source_language(&self) -> &str {
        self.session.source_language()
    }

    fn target_language(&self) -> &str {
        self.session.target_language()
    }

    fn set_progress(&mut self, progress: Option<Progress>) {
        self.progress = progress;
    }
}

/// Hands out [`DocumentTranslator`]s for one session, each with its own
/// engine connection
pub struct SessionTranslators {
    session: Arc<ModelSession>,
    endpoint: DecoderEndpoint,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
}

impl SessionTranslators {
    pub fn new(
        session: Arc<ModelSession>,
        endpoint: DecoderEndpoint,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            session,
            endpoint,
            connector,
            policy,
        }
    }
}

#[async_trait]
impl TranslatorFactory for SessionTranslators {
    async fn create(&self) -> Result<Box<dyn Translate>, TranslateError> {
        let mut client = DecoderClient::new(self.endpoint.clone(), self.connector.clone(), self.policy);
        client.reconnect().await?;
        Ok(Box::new(DocumentTranslator::new(self.session.clone(), client)))
    }
}
