/*!
 * AMQP 0-9-1 broker.
 *
 * Declares the request queue (bound to the request exchange when one is
 * named) and the response exchange, then consumes with a prefetch equal to
 * the number of translation slots. Publishes wait for the broker's
 * confirmation. Passive queue checks run on a channel of their own because
 * the broker closes a channel whose passive declare fails.
 */

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, BasicRejectOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use log::{debug, error, info, trace, warn};
use serde_json::{Map, Number, Value};
use tokio::sync::Mutex;
use url::Url;

use super::{Broker, Delivery, MessageProperties, OutboundMessage};
use crate::decoder::ReconnectPolicy;
use crate::errors::BrokerError;

/// Where to consume from and what to declare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpSettings {
    pub url: String,
    pub request_queue: String,
    /// Bound to the request queue when not empty
    pub request_exchange: String,
    /// Declared when not empty
    pub response_exchange: String,
    /// Unacknowledged deliveries the broker may hand out at once
    pub prefetch: u16,
}

/// Broker speaking AMQP through one connection
pub struct AmqpBroker {
    url: String,
    connection: Connection,
    channel: Channel,
    consumer: Mutex<Consumer>,
    passive: Mutex<Option<Channel>>,
}

impl AmqpBroker {
    /// Connect, declare the topology and start consuming
    pub async fn connect(settings: &AmqpSettings) -> Result<Self, BrokerError> {
        let url = redact(&settings.url);
        let failed = |e: lapin::Error| BrokerError::Connect {
            url: url.clone(),
            message: e.to_string(),
        };

        let connection = Connection::connect(&settings.url, ConnectionProperties::default())
            .await
            .map_err(failed)?;
        info!("Connected with {}", url);

        let channel = connection.create_channel().await.map_err(failed)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(failed)?;
        channel
            .basic_qos(settings.prefetch.max(1), BasicQosOptions::default())
            .await
            .map_err(failed)?;

        channel
            .queue_declare(
                &settings.request_queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(failed)?;

        if !settings.request_exchange.is_empty() {
            declare_exchange(&channel, &settings.request_exchange).await.map_err(failed)?;
            channel
                .queue_bind(
                    &settings.request_queue,
                    &settings.request_exchange,
                    &settings.request_queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(failed)?;
            debug!(
                "Queue '{}' bound to exchange '{}'",
                settings.request_queue, settings.request_exchange
            );
        }
        if !settings.response_exchange.is_empty() {
            declare_exchange(&channel, &settings.response_exchange).await.map_err(failed)?;
        }

        let consumer_tag = format!("mtworker-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &settings.request_queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(failed)?;
        info!(
            "Consuming from '{}' as {} (prefetch {})",
            settings.request_queue, consumer_tag, settings.prefetch
        );

        Ok(Self {
            url,
            connection,
            channel,
            consumer: Mutex::new(consumer),
            passive: Mutex::new(None),
        })
    }

    /// Retry `connect` up to the policy's attempt budget with a fixed delay
    pub async fn connect_with_retry(settings: &AmqpSettings, policy: ReconnectPolicy) -> Result<Self, BrokerError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match Self::connect(settings).await {
                Ok(broker) => return Ok(broker),
                Err(e) if attempt < max_attempts => {
                    warn!("{}. {} tries left", e, max_attempts - attempt);
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Giving up on the broker after {} attempts", max_attempts);
                    return Err(e);
                }
            }
        }
    }

    /// Close the connection; unacknowledged deliveries return to the queue
    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "worker shutting down").await {
            debug!("Error while closing broker connection: {}", e);
        }
    }

    async fn passive_channel(&self) -> Result<Channel, BrokerError> {
        let mut passive = self.passive.lock().await;
        if let Some(channel) = passive.as_ref().filter(|channel| channel.status().connected()) {
            return Ok(channel.clone());
        }

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Closed(e.to_string()))?;
        *passive = Some(channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut consumer = self.consumer.lock().await;
        match consumer.next().await {
            Some(Ok(delivery)) => {
                trace!("Delivery #{} from '{}'", delivery.delivery_tag, delivery.routing_key.as_str());
                Ok(Some(Delivery {
                    tag: delivery.delivery_tag,
                    properties: message_properties(&delivery.properties),
                    redelivered: delivery.redelivered,
                    body: delivery.data,
                }))
            }
            Some(Err(e)) => Err(BrokerError::Closed(format!("{}: {}", self.url, e))),
            None => {
                info!("Consumer cancelled by the broker");
                Ok(None)
            }
        }
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let confirmation = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                basic_properties(&message.properties),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish(format!(
                "broker refused message for exchange '{}' with routing key '{}'",
                message.exchange, message.routing_key
            )));
        }
        debug!(
            "Published {} bytes to '{}' with routing key '{}'",
            message.body.len(),
            message.exchange,
            message.routing_key
        );
        Ok(())
    }

    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                tag,
                message: e.to_string(),
            })
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| BrokerError::Reject {
                tag,
                message: e.to_string(),
            })
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, BrokerError> {
        let channel = self.passive_channel().await?;
        let options = QueueDeclareOptions {
            passive: true,
            ..Default::default()
        };

        match channel.queue_declare(queue, options, FieldTable::default()).await {
            Ok(_) => Ok(true),
            // the broker answers a failed passive declare by closing the channel
            Err(lapin::Error::ProtocolError(e)) => {
                debug!("Passive declare of '{}' refused: {}", queue, e);
                self.passive.lock().await.take();
                Ok(false)
            }
            Err(e) => Err(BrokerError::Closed(e.to_string())),
        }
    }
}

async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
}

/// The URL without its password
fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

fn message_properties(properties: &BasicProperties) -> MessageProperties {
    let text = |value: &Option<ShortString>| value.as_ref().map(|s| s.as_str().to_string());
    MessageProperties {
        headers: properties.headers().as_ref().map(table_to_json).unwrap_or_default(),
        reply_to: text(properties.reply_to()),
        correlation_id: text(properties.correlation_id()),
        message_id: text(properties.message_id()),
    }
}

fn basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default();
    if !properties.headers.is_empty() {
        basic = basic.with_headers(json_to_table(&properties.headers));
    }
    if let Some(reply_to) = &properties.reply_to {
        basic = basic.with_reply_to(ShortString::from(reply_to.clone()));
    }
    if let Some(correlation_id) = &properties.correlation_id {
        basic = basic.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(message_id) = &properties.message_id {
        basic = basic.with_message_id(ShortString::from(message_id.clone()));
    }
    basic
}

fn table_to_json(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), amqp_to_json(value)))
        .collect()
}

fn amqp_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(n) => Value::from(*n),
        AMQPValue::ShortShortUInt(n) => Value::from(*n),
        AMQPValue::ShortInt(n) => Value::from(*n),
        AMQPValue::ShortUInt(n) => Value::from(*n),
        AMQPValue::LongInt(n) => Value::from(*n),
        AMQPValue::LongUInt(n) => Value::from(*n),
        AMQPValue::LongLongInt(n) => Value::from(*n),
        AMQPValue::Timestamp(n) => Value::from(*n),
        AMQPValue::Float(f) => Number::from_f64(f64::from(*f)).map_or(Value::Null, Value::Number),
        AMQPValue::Double(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::FieldArray(items) => Value::Array(items.as_slice().iter().map(amqp_to_json).collect()),
        AMQPValue::FieldTable(table) => Value::Object(table_to_json(table)),
        _ => Value::Null,
    }
}

fn json_to_table(map: &Map<String, Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in map {
        table.insert(ShortString::from(key.clone()), json_to_amqp(value));
    }
    table
}

fn json_to_amqp(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AMQPValue::LongLongInt(i),
            None => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(items) => AMQPValue::FieldArray(items.iter().map(json_to_amqp).collect::<Vec<_>>().into()),
        Value::Object(map) => AMQPValue::FieldTable(json_to_table(map)),
    }
}
