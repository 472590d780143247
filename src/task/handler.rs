/*!
 * Per-job state machine.
 *
 * received → preprocessing → translating → postprocessing → replying →
 * acked | rejected
 *
 * The handler is driven by the context that owns the broker handle. It
 * accepts or rejects a delivery, publishes the reply, acknowledges only
 * after a successful publish, and classifies failures. Translation itself
 * runs on a spawned task that reports its stages and pulses while it is
 * polled; meanwhile the owning context issues passive queue checks at the
 * heartbeat interval.
 */

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use super::failures::FailureLedger;
use super::job::{Job, JobMessage, JobState, TaskData, retry_key};
use crate::broker::{Broker, Delivery, OutboundMessage, ReplyRouting, ResultType};
use crate::errors::{BrokerError, JobError, TranslateError};
use crate::language_utils;
use crate::translation::{Progress, Translate};

/// Shortest pulse period of a translation task
const MIN_PULSE: Duration = Duration::from_millis(10);

/// Handler settings
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Exchange used when a message names none
    pub response_exchange: String,
    pub routing: ReplyRouting,
    /// Queue probed by heartbeats
    pub heartbeat_queue: String,
    pub heartbeat_interval: Duration,
    /// Failures after which a job is rejected for good
    pub max_retries: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            response_exchange: String::new(),
            routing: ReplyRouting::default(),
            heartbeat_queue: String::new(),
            heartbeat_interval: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Acked,
    Rejected,
    Requeued,
    /// Left for the broker's redelivery policy
    Unacknowledged,
}

/// Result of a translation task: the translator comes back with the result
pub type TranslationResult = (Box<dyn Translate>, Result<TaskData, TranslateError>);

/// Translate a payload; meant to run on its own task.
///
/// `progress` receives the translator's stages and a pulse every `pulse`
/// for as long as the task keeps getting polled.
pub async fn run_translation(
    mut translator: Box<dyn Translate>,
    data: TaskData,
    progress: Progress,
    pulse: Duration,
) -> TranslationResult {
    translator.set_progress(Some(progress.clone()));

    let result = {
        let slot = translator.as_mut();
        let work = async move {
            match data {
                TaskData::Document(document) => slot.translate_document(document).await.map(TaskData::Document),
                TaskData::Text(text) => slot.translate_text(&text).await.map(TaskData::Text),
            }
        };
        tokio::pin!(work);

        let mut ticker = tokio::time::interval(pulse.max(MIN_PULSE));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                result = &mut work => break result,
                _ = ticker.tick() => progress.pulse(),
            }
        }
    };

    translator.set_progress(None);
    (translator, result)
}

pub struct TaskHandler {
    broker: Arc<dyn Broker>,
    config: HandlerConfig,
    source_language: String,
    failures: Mutex<FailureLedger>,
}

impl TaskHandler {
    pub fn new(broker: Arc<dyn Broker>, config: HandlerConfig, source_language: &str) -> Self {
        Self {
            broker,
            config,
            source_language: source_language.to_string(),
            failures: Mutex::new(FailureLedger::default()),
        }
    }

    /// Remember failure counts of at most `capacity` messages for `ttl`
    pub fn with_retry_memory(mut self, capacity: usize, ttl: Duration) -> Self {
        self.failures = Mutex::new(FailureLedger::new(capacity, ttl));
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Parse a delivery, check eligibility and resolve its reply target
    pub fn accept(&self, delivery: &Delivery) -> Result<Job, JobError> {
        let message = JobMessage::from_slice(&delivery.body)?;
        self.check_language(&message)?;

        let reply = self.config.routing.resolve(
            &self.config.response_exchange,
            message.body_routing(),
            &delivery.properties,
            ResultType::FinalResult,
        )?;

        let job = Job::new(delivery.tag, retry_key(delivery), message, reply);
        debug!(
            "Job {} (#{}) received{}",
            job.retry_key,
            job.tag,
            if delivery.redelivered { " (redelivered)" } else { "" }
        );
        Ok(job)
    }

    fn check_language(&self, message: &JobMessage) -> Result<(), JobError> {
        match (message.declared_language(), &message.task_data) {
            (Some(code), _) if !language_utils::language_codes_match(code, &self.source_language) => {
                Err(JobError::Reject(format!(
                    "source language '{}' does not match model source '{}'",
                    code, self.source_language
                )))
            }
            (Some(_), _) | (None, TaskData::Text(_)) => Ok(()),
            (None, TaskData::Document(document)) => {
                if document.instances_in(&self.source_language).next().is_some() {
                    Ok(())
                } else {
                    Err(JobError::Reject(format!(
                        "document has no '{}' instance",
                        self.source_language
                    )))
                }
            }
        }
    }

    /// Passive liveness check against the heartbeat queue
    pub async fn heartbeat(&self) {
        match self.broker.queue_exists(&self.config.heartbeat_queue).await {
            Ok(true) => trace!("Heartbeat: queue '{}' present", self.config.heartbeat_queue),
            Ok(false) => warn!("Heartbeat: queue '{}' does not exist", self.config.heartbeat_queue),
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }

    /// Wait for a translation task, heartbeating while it runs
    pub async fn supervise<T>(&self, mut task: JoinHandle<T>) -> Result<T, JoinError> {
        let interval = self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                joined = &mut task => return joined,
                _ = ticker.tick() => self.heartbeat().await,
            }
        }
    }

    /// Publish the reply, then acknowledge the delivery
    pub async fn reply(&self, job: &mut Job, result: TaskData) -> Result<(), JobError> {
        job.advance(JobState::Replying);

        let body = serde_json::to_vec(&job.reply_body(result))
            .map_err(|e| JobError::PublishFailed(BrokerError::Publish(e.to_string())))?;
        let message = OutboundMessage {
            exchange: job.reply.exchange.clone(),
            routing_key: job.reply.routing_key.clone(),
            body,
            properties: job.reply.properties.clone(),
        };

        self.broker.publish(message).await.map_err(JobError::PublishFailed)?;
        self.broker.ack(job.tag).await.map_err(JobError::AckFailed)?;
        job.advance(JobState::Acked);
        Ok(())
    }

    /// Finish a job once its translation task is done
    pub async fn complete(&self, mut job: Job, result: Result<TaskData, TranslateError>) -> JobOutcome {
        let outcome = match result {
            Ok(data) => self.reply(&mut job, data).await,
            Err(e) => Err(JobError::Failed(e)),
        };

        if outcome.is_ok() {
            info!("Job {} done in {:?}", job.retry_key, job.elapsed());
        }
        self.settle(job.tag, &job.retry_key, outcome).await
    }

    /// Apply the failure taxonomy to a finished delivery
    pub async fn settle(&self, tag: u64, retry_key: &str, outcome: Result<(), JobError>) -> JobOutcome {
        let error = match outcome {
            Ok(()) => {
                self.failures.lock().clear(retry_key);
                return JobOutcome::Acked;
            }
            Err(error) => error,
        };

        match error {
            JobError::Reject(reason) => {
                warn!("Rejecting job {}: {}", retry_key, reason);
                self.failures.lock().clear(retry_key);
                self.reject(tag, false).await
            }
            JobError::RejectRequeue(_) | JobError::Failed(_) => {
                let failures = self.failures.lock().record(retry_key);

                if failures >= self.config.max_retries {
                    error!(
                        "Job {} failed {} time(s), rejecting for good: {}",
                        retry_key, failures, error
                    );
                    self.failures.lock().clear(retry_key);
                    self.reject(tag, false).await
                } else {
                    warn!(
                        "Job {} failed ({}/{}), requeueing: {}",
                        retry_key, failures, self.config.max_retries, error
                    );
                    self.reject(tag, true).await
                }
            }
            JobError::PublishFailed(_) | JobError::AckFailed(_) => {
                error!("Job {}: {}", retry_key, error);
                JobOutcome::Unacknowledged
            }
        }
    }

    async fn reject(&self, tag: u64, requeue: bool) -> JobOutcome {
        match self.broker.reject(tag, requeue).await {
            Ok(()) if requeue => JobOutcome::Requeued,
            Ok(()) => {
                debug!("Delivery #{}: → {}", tag, JobState::Rejected);
                JobOutcome::Rejected
            }
            Err(e) => {
                error!("{}", e);
                JobOutcome::Unacknowledged
            }
        }
    }

    /// Run one delivery end to end.
    ///
    /// The translator is handed back unless its task panicked.
    pub async fn process(
        &self,
        delivery: Delivery,
        translator: Box<dyn Translate>,
    ) -> (Option<Box<dyn Translate>>, JobOutcome) {
        let mut job = match self.accept(&delivery) {
            Ok(job) => job,
            Err(e) => {
                let outcome = self.settle(delivery.tag, &retry_key(&delivery), Err(e)).await;
                return (Some(translator), outcome);
            }
        };

        let (progress, _stages) = Progress::new(&job.retry_key);
        let task = tokio::spawn(run_translation(
            translator,
            job.message.task_data.clone(),
            progress,
            self.config.heartbeat_interval,
        ));

        match self.supervise(task).await {
            Ok((translator, result)) => {
                let outcome = self.complete(job, result).await;
                (Some(translator), outcome)
            }
            Err(e) => {
                let outcome = self
                    .settle(job.tag, &job.retry_key, Err(JobError::RejectRequeue(e.to_string())))
                    .await;
                (None, outcome)
            }
        }
    }
}
