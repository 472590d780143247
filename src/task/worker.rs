/*!
 * Worker pool.
 *
 * One coordinator task owns the broker handle and N translation slots. It
 * takes deliveries while a slot is free, runs each translation on a spawned
 * task, heartbeats while anything is in flight and settles every delivery
 * itself. Slots never touch the broker.
 *
 * A translation counts as hung when its progress channel stays silent for
 * `restart_timeout`; total job duration is not bounded. Engine restarts and
 * slot recreation run as in-flight futures next to the translations, so
 * heartbeats and settlements continue while a slot recovers. A slot whose
 * translator cannot be recreated is retired.
 */

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::handler::{JobOutcome, TaskHandler, TranslationResult, run_translation};
use super::job::{Job, retry_key};
use crate::decoder::DecoderProcess;
use crate::errors::{DecoderError, JobError, TranslateError, WorkerError};
use crate::translation::{Progress, Stage, Translate, TranslatorFactory};

/// Something that can restart the engine after a hung job
#[async_trait]
pub trait EngineSupervisor: Send + Sync {
    async fn restart(&self) -> Result<(), DecoderError>;
}

#[async_trait]
impl EngineSupervisor for tokio::sync::Mutex<DecoderProcess> {
    async fn restart(&self) -> Result<(), DecoderError> {
        self.lock().await.restart().await
    }
}

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Translation slots
    pub parallel: usize,
    /// A translation silent for longer than this is considered hung
    pub restart_timeout: Option<Duration>,
    /// Pause before taking the first delivery
    pub startup_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            parallel: 1,
            restart_timeout: Some(Duration::from_secs(300)),
            startup_delay: Duration::ZERO,
        }
    }
}

/// Settled deliveries by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub acked: usize,
    pub rejected: usize,
    pub requeued: usize,
    pub unacknowledged: usize,
}

impl WorkerStats {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Acked => self.acked += 1,
            JobOutcome::Rejected => self.rejected += 1,
            JobOutcome::Requeued => self.requeued += 1,
            JobOutcome::Unacknowledged => self.unacknowledged += 1,
        }
    }
}

enum SlotFailure {
    Stalled(Duration),
    Panicked(String),
}

struct Finished {
    job: Job,
    result: Result<TranslationResult, SlotFailure>,
}

/// What an in-flight future resolves to
enum SlotEvent {
    Finished(Finished),
    /// A replacement translator, or why the slot could not be refilled
    Recovered(Result<Box<dyn Translate>, TranslateError>),
}

/// One observation of a job's progress channel
enum Report {
    Progress(Option<Stage>),
    Silent,
    Closed,
}

async fn next_report(stages: &mut watch::Receiver<Option<Stage>>, limit: Option<Duration>) -> Report {
    let changed = match limit {
        Some(limit) => match tokio::time::timeout(limit, stages.changed()).await {
            Ok(changed) => changed,
            Err(_) => return Report::Silent,
        },
        None => stages.changed().await,
    };

    match changed {
        Ok(()) => Report::Progress(*stages.borrow_and_update()),
        Err(_) => Report::Closed,
    }
}

pub struct Worker {
    handler: Arc<TaskHandler>,
    factory: Arc<dyn TranslatorFactory>,
    engine: Option<Arc<dyn EngineSupervisor>>,
    config: PoolConfig,
}

impl Worker {
    pub fn new(handler: Arc<TaskHandler>, factory: Arc<dyn TranslatorFactory>, config: PoolConfig) -> Self {
        Self {
            handler,
            factory,
            engine: None,
            config,
        }
    }

    /// Restart this engine when a translation hangs
    pub fn with_engine(mut self, engine: Arc<dyn EngineSupervisor>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Consume deliveries until the broker is drained
    pub async fn run(&self) -> Result<WorkerStats, WorkerError> {
        if !self.config.startup_delay.is_zero() {
            info!("Waiting {:?} before taking jobs", self.config.startup_delay);
            tokio::time::sleep(self.config.startup_delay).await;
        }

        let mut slots = self.config.parallel.max(1);
        let mut idle: Vec<Box<dyn Translate>> = Vec::with_capacity(slots);
        for _ in 0..slots {
            idle.push(self.factory.create().await?);
        }
        info!("Worker ready with {} translation slot(s)", slots);

        let broker = self.handler.broker().clone();
        let heartbeat = self.handler.config().heartbeat_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut inflight: FuturesUnordered<BoxFuture<'static, SlotEvent>> = FuturesUnordered::new();
        let mut stats = WorkerStats::default();
        let mut retired = 0;
        let mut drained = false;

        loop {
            if drained && inflight.is_empty() {
                break;
            }

            tokio::select! {
                Some(event) = inflight.next(), if !inflight.is_empty() => match event {
                    SlotEvent::Finished(finished) => {
                        let outcome = self.finish(finished, &mut idle, &mut inflight).await;
                        if outcome == JobOutcome::Requeued {
                            drained = false;
                        }
                        stats.record(outcome);
                    }
                    SlotEvent::Recovered(Ok(translator)) => {
                        debug!("Translation slot recovered");
                        idle.push(translator);
                    }
                    SlotEvent::Recovered(Err(e)) => {
                        slots -= 1;
                        retired += 1;
                        error!("Retiring translation slot, {} left: {}", slots, e);
                        if slots == 0 {
                            return Err(WorkerError::NoSlots { retired });
                        }
                    }
                },
                delivery = broker.next_delivery(), if !drained && !idle.is_empty() => {
                    let Some(delivery) = delivery? else {
                        debug!("No more deliveries, waiting for {} future(s) in flight", inflight.len());
                        drained = true;
                        continue;
                    };

                    match self.handler.accept(&delivery) {
                        Ok(job) => {
                            if let Some(translator) = idle.pop() {
                                inflight.push(self.dispatch(job, translator));
                            }
                        }
                        Err(e) => {
                            let outcome = self.handler.settle(delivery.tag, &retry_key(&delivery), Err(e)).await;
                            stats.record(outcome);
                        }
                    }
                }
                _ = ticker.tick(), if !inflight.is_empty() => self.handler.heartbeat().await,
                else => break,
            }
        }

        info!(
            "Worker finished: {} acked, {} rejected, {} requeued, {} unacknowledged",
            stats.acked, stats.rejected, stats.requeued, stats.unacknowledged
        );
        Ok(stats)
    }

    fn dispatch(&self, mut job: Job, translator: Box<dyn Translate>) -> BoxFuture<'static, SlotEvent> {
        let limit = self.config.restart_timeout;
        let heartbeat = self.handler.config().heartbeat_interval;
        let pulse = limit.map_or(heartbeat, |limit| heartbeat.min(limit / 4));

        let (progress, mut stages) = Progress::new(&job.retry_key);
        let mut task = tokio::spawn(run_translation(
            translator,
            job.message.task_data.clone(),
            progress,
            pulse,
        ));

        async move {
            let mut current = None;
            let result = loop {
                tokio::select! {
                    joined = &mut task => break joined.map_err(|e| SlotFailure::Panicked(e.to_string())),
                    report = next_report(&mut stages, limit) => match report {
                        Report::Progress(stage) => {
                            if stage != current {
                                current = stage;
                                if let Some(stage) = stage {
                                    job.advance(stage.into());
                                }
                            }
                        }
                        Report::Silent => {
                            task.abort();
                            break Err(SlotFailure::Stalled(limit.unwrap_or_default()));
                        }
                        Report::Closed => break (&mut task).await.map_err(|e| SlotFailure::Panicked(e.to_string())),
                    },
                }
            };
            SlotEvent::Finished(Finished { job, result })
        }
        .boxed()
    }

    /// Replace a lost translator, restarting the engine first if asked
    fn recover(&self, restart_engine: bool) -> BoxFuture<'static, SlotEvent> {
        let engine = self.engine.clone().filter(|_| restart_engine);
        let factory = self.factory.clone();

        async move {
            if let Some(engine) = engine {
                if let Err(e) = engine.restart().await {
                    error!("Decoder restart failed: {}", e);
                }
            }
            SlotEvent::Recovered(factory.create().await)
        }
        .boxed()
    }

    async fn finish(
        &self,
        finished: Finished,
        idle: &mut Vec<Box<dyn Translate>>,
        inflight: &mut FuturesUnordered<BoxFuture<'static, SlotEvent>>,
    ) -> JobOutcome {
        let Finished { job, result } = finished;

        let (reason, restart_engine) = match result {
            Ok((translator, result)) => {
                idle.push(translator);
                return self.handler.complete(job, result).await;
            }
            Err(SlotFailure::Stalled(limit)) => {
                warn!("Job {} made no progress for {:?}, restarting decoder", job.retry_key, limit);
                (format!("translation made no progress for {:?}", limit), true)
            }
            Err(SlotFailure::Panicked(message)) => {
                error!("Translation task for job {} died: {}", job.retry_key, message);
                (message, false)
            }
        };

        inflight.push(self.recover(restart_engine));
        self.handler
            .settle(job.tag, &job.retry_key, Err(JobError::RejectRequeue(reason)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker, MessageProperties};
    use crate::task::handler::HandlerConfig;
    use crate::translation::Document;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Echoes text.
    ///
    /// "slow" takes 250 s, "block" blocks its thread for a second and
    /// "panic" panics; the last two only while `trips` is set.
    struct Echo {
        trips: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Translate for Echo {
        async fn translate_document(&mut self, document: Document) -> Result<Document, TranslateError> {
            Ok(document)
        }

        async fn translate_text(&mut self, text: &str) -> Result<String, TranslateError> {
            match text {
                "slow" => tokio::time::sleep(Duration::from_secs(250)).await,
                "block" if self.trips.swap(false, Ordering::SeqCst) => {
                    std::thread::sleep(Duration::from_secs(1));
                }
                "panic" if self.trips.swap(false, Ordering::SeqCst) => panic!("engine crashed"),
                _ => {}
            }
            Ok(text.to_string())
        }

        fn source_language(&self) -> &str {
            "de"
        }

        fn target_language(&self) -> &str {
            "en"
        }
    }

    #[derive(Default)]
    struct EchoFactory {
        trips: Arc<AtomicBool>,
        created: AtomicUsize,
        /// Time each creation after the first `parallel` ones takes
        recovery_delay: Duration,
        /// Creations beyond this many fail
        limit: Option<usize>,
    }

    #[async_trait]
    impl TranslatorFactory for EchoFactory {
        async fn create(&self) -> Result<Box<dyn Translate>, TranslateError> {
            let count = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            if self.limit.is_some_and(|limit| count > limit) {
                return Err(DecoderError::NotConnected.into());
            }
            if count > 2 && !self.recovery_delay.is_zero() {
                tokio::time::sleep(self.recovery_delay).await;
            }
            Ok(Box::new(Echo {
                trips: self.trips.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct CountingEngine {
        restarts: AtomicUsize,
    }

    #[async_trait]
    impl EngineSupervisor for CountingEngine {
        async fn restart(&self) -> Result<(), DecoderError> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn push(broker: &MemoryBroker, text: &str, id: &str) {
        let body = json!({"taskData": text, "replyToRoutingKeys": {"finalResult": "out"}});
        broker.push(
            body.to_string().into_bytes(),
            MessageProperties {
                message_id: Some(id.to_string()),
                ..Default::default()
            },
        );
    }

    fn worker(broker: Arc<MemoryBroker>, heartbeat: Duration, factory: EchoFactory, config: PoolConfig) -> (Worker, Arc<EchoFactory>) {
        let handler = TaskHandler::new(
            broker,
            HandlerConfig {
                heartbeat_queue: "mt-in".to_string(),
                heartbeat_interval: heartbeat,
                max_retries: 2,
                ..Default::default()
            },
            "de",
        );
        let factory = Arc::new(factory);
        (Worker::new(Arc::new(handler), factory.clone(), config), factory)
    }

    fn tripped() -> EchoFactory {
        EchoFactory {
            trips: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_shouldSettleEveryDelivery() {
        let broker = Arc::new(MemoryBroker::new());
        for i in 0..5 {
            push(&broker, &format!("satz {}", i), &format!("m{}", i));
        }
        broker.push_body("not json");
        broker.close();

        let config = PoolConfig {
            parallel: 3,
            ..Default::default()
        };
        let (worker, factory) = worker(broker.clone(), Duration::from_secs(10), EchoFactory::default(), config);
        let stats = worker.run().await.unwrap();

        assert_eq!(stats.acked, 5);
        assert_eq!(stats.rejected, 1);
        assert_eq!(broker.published().len(), 5);
        assert_eq!(broker.unsettled(), 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_withTranslationLongerThanRestartTimeout_shouldStillAck() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("mt-in");
        push(&broker, "slow", "s");
        push(&broker, "fine", "f");
        broker.close();

        let engine = Arc::new(CountingEngine::default());
        let config = PoolConfig {
            parallel: 2,
            restart_timeout: Some(Duration::from_secs(60)),
            startup_delay: Duration::ZERO,
        };
        let (worker, _) = worker(broker.clone(), Duration::from_secs(10), EchoFactory::default(), config);
        let worker = worker.with_engine(engine.clone());

        let stats = worker.run().await.unwrap();

        assert_eq!(stats.acked, 2);
        assert_eq!(stats.requeued + stats.rejected, 0);
        assert_eq!(engine.restarts.load(Ordering::SeqCst), 0);
        assert_eq!(broker.published().len(), 2);
        // heartbeats kept going for the whole 250 s
        assert!(broker.passive_checks() >= 24);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_withBlockedTranslation_shouldRestartEngineAndRetry() {
        let broker = Arc::new(MemoryBroker::new());
        push(&broker, "block", "b");
        push(&broker, "fine", "f");
        broker.close();

        let engine = Arc::new(CountingEngine::default());
        let config = PoolConfig {
            parallel: 1,
            restart_timeout: Some(Duration::from_millis(200)),
            startup_delay: Duration::ZERO,
        };
        let (worker, factory) = worker(broker.clone(), Duration::from_millis(50), tripped(), config);
        let worker = worker.with_engine(engine.clone());

        let stats = worker.run().await.unwrap();

        assert_eq!(engine.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.rejected, 0);
        // the blocked translator was replaced
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(broker.unsettled(), 0);
        assert!(broker.next_delivery().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_whileSlotRecovers_shouldKeepHeartbeating() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("mt-in");
        push(&broker, "panic", "p");
        push(&broker, "slow", "s");
        broker.close();

        let factory = EchoFactory {
            recovery_delay: Duration::from_secs(120),
            ..tripped()
        };
        let config = PoolConfig {
            parallel: 2,
            restart_timeout: Some(Duration::from_secs(60)),
            startup_delay: Duration::ZERO,
        };
        let (worker, factory) = worker(broker.clone(), Duration::from_secs(10), factory, config);

        let stats = worker.run().await.unwrap();

        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        assert!(broker.passive_checks() >= 24);
    }

    #[tokio::test]
    async fn test_run_whenSlotCannotBeRecreated_shouldRetireItAndCarryOn() {
        let broker = Arc::new(MemoryBroker::new());
        push(&broker, "panic", "p");
        for i in 0..3 {
            push(&broker, &format!("satz {}", i), &format!("m{}", i));
        }
        broker.close();

        let factory = EchoFactory {
            limit: Some(2),
            ..tripped()
        };
        let config = PoolConfig {
            parallel: 2,
            ..Default::default()
        };
        let (worker, _) = worker(broker.clone(), Duration::from_secs(10), factory, config);

        let stats = worker.run().await.unwrap();

        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 4);
        assert_eq!(broker.unsettled(), 0);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_run_whenEverySlotIsRetired_shouldStopWithoutLosingDeliveries() {
        let broker = Arc::new(MemoryBroker::new());
        push(&broker, "panic", "p");
        push(&broker, "fine", "f");
        broker.close();

        let factory = EchoFactory {
            limit: Some(1),
            ..tripped()
        };
        let config = PoolConfig {
            parallel: 1,
            ..Default::default()
        };
        let (worker, _) = worker(broker.clone(), Duration::from_secs(10), factory, config);

        let result = worker.run().await;

        assert!(matches!(result, Err(WorkerError::NoSlots { retired: 1 })));
        assert_eq!(broker.unsettled(), 0);
        // the crashed job went back to the queue, the other was never taken
        assert_eq!(broker.pending(), 2);
    }
}
