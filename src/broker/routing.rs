/*!
 * Reply routing conventions.
 *
 * Producers name the reply target in one of two ways:
 *
 * - `direct`: the `reply_to` property is the routing key and the
 *   `correlation_id` is echoed back
 * - `headers`: `replyToExchange` and a `replyToRoutingKeys` map
 *   (`{finalResult, partialResult}`) travel in the message headers
 *
 * In both conventions the body fields of the same names are the fallback.
 * The convention is chosen by configuration, never by sniffing a message.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::MessageProperties;
use crate::errors::{CodecError, ConfigError};

/// Header naming the component that produced a reply
pub const PRODUCER_HEADER: &str = "resultProducerName";

/// Value of [`PRODUCER_HEADER`] on every reply
pub const PRODUCER_NAME: &str = "SUMMA-MT";

const EXCHANGE_HEADER: &str = "replyToExchange";
const ROUTING_KEYS_HEADER: &str = "replyToRoutingKeys";

/// Kind of result being published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultType {
    FinalResult,
    PartialResult,
}

/// Routing keys per result type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<String>,
}

impl RoutingKeys {
    pub fn key_for(&self, result_type: ResultType) -> Option<&str> {
        match result_type {
            ResultType::FinalResult => self.final_result.as_deref(),
            ResultType::PartialResult => self.partial_result.as_deref(),
        }
        .filter(|key| !key.is_empty())
    }
}

/// Reply fields carried in a job body
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyRouting<'a> {
    pub exchange: Option<&'a str>,
    pub routing_keys: Option<&'a RoutingKeys>,
}

/// Where and how to publish a reply
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyTarget {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
}

/// Configured reply routing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyRouting {
    #[default]
    #[serde(alias = "reply-to")]
    Direct,
    #[serde(alias = "header")]
    Headers,
}

impl ReplyRouting {
    /// Resolve the reply target of a message
    pub fn resolve(
        &self,
        default_exchange: &str,
        body: BodyRouting<'_>,
        properties: &MessageProperties,
        result_type: ResultType,
    ) -> Result<ReplyTarget, CodecError> {
        let body_key = body.routing_keys.and_then(|keys| keys.key_for(result_type));

        let (exchange, routing_key) = match self {
            Self::Direct => {
                let key = properties
                    .reply_to
                    .as_deref()
                    .filter(|key| !key.is_empty())
                    .or(body_key);
                (body.exchange.map(str::to_string), key.map(str::to_string))
            }
            Self::Headers => {
                let exchange = properties
                    .header(EXCHANGE_HEADER)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| body.exchange.map(str::to_string));
                let key = properties
                    .header(ROUTING_KEYS_HEADER)
                    .and_then(routing_keys_from_header)
                    .and_then(|keys| keys.key_for(result_type).map(str::to_string))
                    .or_else(|| body_key.map(str::to_string));
                (exchange, key)
            }
        };

        let routing_key = routing_key.ok_or_else(|| CodecError::MissingField("reply routing key".to_string()))?;
        let reply_properties = MessageProperties {
            correlation_id: properties.correlation_id.clone(),
            ..Default::default()
        }
        .with_header(PRODUCER_HEADER, PRODUCER_NAME);

        Ok(ReplyTarget {
            exchange: exchange.unwrap_or_else(|| default_exchange.to_string()),
            routing_key,
            properties: reply_properties,
        })
    }
}

/// The header is either a table or its JSON text
fn routing_keys_from_header(value: &Value) -> Option<RoutingKeys> {
    match value {
        Value::String(text) => serde_json::from_str(text).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}

impl FromStr for ReplyRouting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" | "reply-to" => Ok(Self::Direct),
            "headers" | "header" => Ok(Self::Headers),
            other => Err(ConfigError::InvalidParameter {
                parameter: "reply-routing".to_string(),
                message: format!("unknown convention '{}'", other),
            }),
        }
    }
}

impl fmt::Display for ReplyRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Headers => write!(f, "headers"),
        }
    }
}
