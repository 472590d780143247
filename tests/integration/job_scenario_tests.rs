/*!
 * Job protocol scenarios: a loaded de-en model, a mock engine and an
 * in-process broker
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use mtworker::broker::{
    Broker, Delivery, MemoryBroker, MessageProperties, OutboundMessage, PRODUCER_HEADER, PRODUCER_NAME,
    ReplyRouting,
};
use mtworker::decoder::{Connector, DecoderEndpoint, ReconnectPolicy};
use mtworker::errors::BrokerError;
use mtworker::session::ModelSession;
use mtworker::task::{HandlerConfig, PoolConfig, TaskHandler, Worker};
use mtworker::translation::SessionTranslators;

use crate::common::{self, ReverseConnector};

/// Broker wrapper that records the order of publishes and passive checks
struct EventLog {
    inner: MemoryBroker,
    events: Mutex<Vec<&'static str>>,
}

impl EventLog {
    fn new() -> Arc<Self> {
        let inner = MemoryBroker::new();
        inner.declare_queue("requests");
        Arc::new(Self {
            inner,
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Broker for EventLog {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        self.inner.next_delivery().await
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        self.events.lock().push("publish");
        self.inner.publish(message).await
    }

    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.events.lock().push("ack");
        self.inner.ack(tag).await
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.events.lock().push(if requeue { "requeue" } else { "reject" });
        self.inner.reject(tag, requeue).await
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, BrokerError> {
        self.events.lock().push("check");
        self.inner.queue_exists(queue).await
    }
}

fn session() -> (tempfile::TempDir, Arc<ModelSession>) {
    common::init_logging();
    let root = common::create_temp_dir().unwrap();
    common::create_test_model(root.path()).unwrap();
    let session = ModelSession::load(root.path(), "de-en").unwrap();
    (root, Arc::new(session))
}

fn worker(broker: Arc<dyn Broker>, connector: Arc<dyn Connector>, routing: ReplyRouting) -> (tempfile::TempDir, Worker) {
    let (root, session) = session();
    let handler = TaskHandler::new(
        broker,
        HandlerConfig {
            response_exchange: "mt-out".to_string(),
            routing,
            heartbeat_queue: "requests".to_string(),
            heartbeat_interval: Duration::from_secs(10),
            max_retries: 3,
        },
        session.source_language(),
    );
    let translators = Arc::new(SessionTranslators::new(
        session,
        DecoderEndpoint::local(8080),
        connector,
        ReconnectPolicy::default(),
    ));
    (root, Worker::new(Arc::new(handler), translators, PoolConfig::default()))
}

fn job(language: &str) -> Vec<u8> {
    json!({
        "taskData": common::test_document(language, &["Das ist gut .", "Am 3.10.1990 war es kalt ."]),
        "taskMetadata": {"taskSpecificMetadata": {"contentDetectedLangCode": language}},
        "replyToRoutingKeys": {"finalResult": "mt.final"}
    })
    .to_string()
    .into_bytes()
}

/// A German job gets exactly one English instance appended
#[tokio::test]
async fn test_worker_withMatchingLanguage_shouldAppendTranslatedInstance() {
    let broker = Arc::new(MemoryBroker::new());
    broker.push(
        job("de"),
        MessageProperties {
            correlation_id: Some("c-1".to_string()),
            ..Default::default()
        },
    );
    broker.close();

    let (_root, worker) = worker(broker.clone(), ReverseConnector::new(), ReplyRouting::Direct);
    let stats = worker.run().await.unwrap();
    assert_eq!(stats.acked, 1);

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "mt-out");
    assert_eq!(published[0].routing_key, "mt.final");
    assert_eq!(published[0].properties.correlation_id.as_deref(), Some("c-1"));

    let reply: Value = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(reply["resultType"], "finalResult");
    assert_eq!(reply["taskMetadata"]["taskSpecificMetadata"]["contentDetectedLangCode"], "de");

    let instances = reply["resultData"]["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0]["metadata"]["language"], "de");
    assert_eq!(instances[1]["metadata"]["language"], "en");
    assert_eq!(instances[1]["metadata"]["id"], 1);

    let sentences = instances[1]["body"]["sentences"].as_array().unwrap();
    let first: Vec<&str> = sentences[0]["tokens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["token"]["token"].as_str().unwrap())
        .collect();
    assert_eq!(first, vec![".", "gut", "ist", "Das"]);
    assert_eq!(broker.unsettled(), 0);
}

/// A French job against a German model is rejected for good without a reply
#[tokio::test]
async fn test_worker_withOtherLanguage_shouldRejectPermanently() {
    let broker = Arc::new(MemoryBroker::new());
    let tag = broker.push_body(job("fr"));
    broker.close();

    let (_root, worker) = worker(broker.clone(), ReverseConnector::new(), ReplyRouting::Direct);
    let stats = worker.run().await.unwrap();

    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.requeued, 0);
    assert!(broker.published().is_empty());
    assert_eq!(broker.rejected(), vec![(tag, false)]);
    assert_eq!(broker.pending(), 0);
}

/// A translation longer than one heartbeat interval is heartbeated before the reply
#[tokio::test(start_paused = true)]
async fn test_worker_withSlowTranslation_shouldHeartbeatBeforeReplying() {
    let broker = EventLog::new();
    broker.inner.push_body(job("de"));
    broker.inner.close();

    let connector = ReverseConnector::slow(Duration::from_secs(25));
    let (_root, worker) = worker(broker.clone(), connector, ReplyRouting::Direct);
    let stats = worker.run().await.unwrap();
    assert_eq!(stats.acked, 1);

    let events = broker.events();
    let publish = events.iter().position(|e| *e == "publish").unwrap();
    let checks_before = events[..publish].iter().filter(|e| **e == "check").count();
    assert!(checks_before >= 1, "events: {:?}", events);
    assert_eq!(&events[publish..], &["publish", "ack"]);
    assert!(broker.inner.passive_checks() >= 1);
}

/// With header routing the reply goes where the headers say
#[tokio::test]
async fn test_worker_withHeaderRouting_shouldUseHeaderRoutingKeys() {
    let broker = Arc::new(MemoryBroker::new());
    let body = json!({"taskData": "Guten Morgen", "replyToRoutingKeys": {"finalResult": "body.key"}});
    broker.push(
        body.to_string().into_bytes(),
        MessageProperties::default()
            .with_header("replyToExchange", "results")
            .with_header("replyToRoutingKeys", json!({"finalResult": "header.key"})),
    );
    broker.close();

    let (_root, worker) = worker(broker.clone(), ReverseConnector::new(), ReplyRouting::Headers);
    worker.run().await.unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "results");
    assert_eq!(published[0].routing_key, "header.key");
    assert_eq!(
        published[0].properties.header(PRODUCER_HEADER),
        Some(&Value::from(PRODUCER_NAME))
    );

    let reply: Value = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(reply["resultData"], "Morgen Guten");
}

/// An unreachable engine leaves the worker unable to start
#[tokio::test(start_paused = true)]
async fn test_worker_withUnreachableEngine_shouldFailToStart() {
    let broker = Arc::new(MemoryBroker::new());
    broker.push_body(job("de"));
    broker.close();

    let connector = ReverseConnector::flaky(u32::MAX);
    let (_root, worker) = worker(broker.clone(), connector.clone(), ReplyRouting::Direct);

    assert!(worker.run().await.is_err());
    assert_eq!(connector.attempts(), ReconnectPolicy::default().max_attempts);
    assert!(broker.published().is_empty());
}
