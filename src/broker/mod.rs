/*!
 * Message broker seam.
 *
 * The worker never talks to a concrete broker library. A `Broker` hands out
 * deliveries and accepts publish/ack/reject/passive-check calls; all of these
 * are issued from the single coordinator task that owns the handle, so
 * acknowledgments always happen on the context that received the message.
 *
 * - `amqp`: AMQP 0-9-1 broker used by the worker command
 * - `memory`: in-process broker for stdin mode, single tasks and the tests
 * - `routing`: reply routing conventions
 */

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::BrokerError;

pub mod amqp;
pub mod memory;
pub mod routing;

pub use amqp::{AmqpBroker, AmqpSettings};
pub use memory::MemoryBroker;
pub use routing::{BodyRouting, PRODUCER_HEADER, PRODUCER_NAME, ReplyRouting, ReplyTarget, ResultType, RoutingKeys};

/// Message properties relevant to routing and retry accounting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub headers: Map<String, Value>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
}

impl MessageProperties {
    pub fn with_header(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }
}

/// A received message awaiting acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned tag used for ack/reject
    pub tag: u64,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub redelivered: bool,
}

/// A message to publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// Broker operations used by the worker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Wait for the next delivery; `None` once the source is closed and drained.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    async fn ack(&self, tag: u64) -> Result<(), BrokerError>;

    /// Reject a delivery, optionally asking for redelivery
    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Passive existence check; never changes queue or acknowledgment state
    async fn queue_exists(&self, queue: &str) -> Result<bool, BrokerError>;
}
