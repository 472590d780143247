/*!
 * In-process broker.
 *
 * Keeps a FIFO of pending deliveries and records every publish, ack, reject
 * and passive check. Requeued deliveries go to the back of the queue with
 * `redelivered` set and a fresh tag.
 */

use async_trait::async_trait;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};

use super::{Broker, Delivery, MessageProperties, OutboundMessage};
use crate::errors::BrokerError;

#[derive(Default)]
struct State {
    pending: VecDeque<Delivery>,
    unsettled: HashMap<u64, Delivery>,
    closed: bool,
}

/// Broker living entirely in memory
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    arrivals: Notify,
    next_tag: AtomicU64,
    queues: Mutex<HashSet<String>>,
    published: Mutex<Vec<OutboundMessage>>,
    acked: Mutex<Vec<u64>>,
    rejected: Mutex<Vec<(u64, bool)>>,
    passive_checks: AtomicUsize,
    failing_publishes: AtomicUsize,
    outbox: Option<mpsc::UnboundedSender<OutboundMessage>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every published message to `outbox`
    pub fn with_outbox(mut self, outbox: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Make `queue` known to passive checks
    pub fn declare_queue(&self, queue: &str) {
        self.queues.lock().insert(queue.to_string());
    }

    /// Enqueue a message; returns its delivery tag
    pub fn push(&self, body: Vec<u8>, properties: MessageProperties) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().pending.push_back(Delivery {
            tag,
            body,
            properties,
            redelivered: false,
        });
        self.arrivals.notify_waiters();
        tag
    }

    /// Enqueue a body with a fresh message id
    pub fn push_body(&self, body: impl Into<Vec<u8>>) -> u64 {
        let properties = MessageProperties {
            message_id: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        };
        self.push(body.into(), properties)
    }

    /// No further messages will arrive; `next_delivery` returns `None` once drained
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.arrivals.notify_waiters();
    }

    /// Make the next `count` publishes fail
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().clone()
    }

    /// `(tag, requeue)` of every rejection
    pub fn rejected(&self) -> Vec<(u64, bool)> {
        self.rejected.lock().clone()
    }

    pub fn passive_checks(&self) -> usize {
        self.passive_checks.load(Ordering::SeqCst)
    }

    /// Deliveries handed out but neither acked nor rejected
    pub fn unsettled(&self) -> usize {
        self.state.lock().unsettled.len()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn settle(&self, tag: u64) -> Option<Delivery> {
        self.state.lock().unsettled.remove(&tag)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            let arrival = self.arrivals.notified();
            {
                let mut state = self.state.lock();
                if let Some(delivery) = state.pending.pop_front() {
                    state.unsettled.insert(delivery.tag, delivery.clone());
                    trace!("Delivering message #{}", delivery.tag);
                    return Ok(Some(delivery));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            arrival.await;
        }
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let failing = self.failing_publishes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_publishes.store(failing - 1, Ordering::SeqCst);
            return Err(BrokerError::Publish(format!(
                "exchange '{}' unavailable",
                message.exchange
            )));
        }

        debug!(
            "Published {} bytes to '{}' with routing key '{}'",
            message.body.len(),
            message.exchange,
            message.routing_key
        );
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(message.clone());
        }
        self.published.lock().push(message);
        Ok(())
    }

    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.settle(tag).ok_or_else(|| BrokerError::Ack {
            tag,
            message: "unknown delivery tag".to_string(),
        })?;
        self.acked.lock().push(tag);
        Ok(())
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let delivery = self.settle(tag).ok_or_else(|| BrokerError::Reject {
            tag,
            message: "unknown delivery tag".to_string(),
        })?;
        self.rejected.lock().push((tag, requeue));

        if requeue {
            let new_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.lock().pending.push_back(Delivery {
                tag: new_tag,
                redelivered: true,
                ..delivery
            });
            self.arrivals.notify_waiters();
        }
        Ok(())
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, BrokerError> {
        self.passive_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.queues.lock().contains(queue))
    }
}
