use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, Instant};

use crate::broker::{BodyRouting, Delivery, ReplyTarget, ResultType, RoutingKeys};
use crate::errors::CodecError;
use crate::translation::{Document, Stage};

/// Payload of a job: a structured document or plain text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskData {
    Text(String),
    Document(Document),
}

/// Inbound job message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub task_data: TaskData,

    #[serde(default)]
    pub task_metadata: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_exchange: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_routing_keys: Option<RoutingKeys>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobMessage {
    pub fn from_slice(body: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Source language detected by the producer
    /// (`taskMetadata.taskSpecificMetadata.contentDetectedLangCode`)
    pub fn declared_language(&self) -> Option<&str> {
        self.task_metadata
            .get("taskSpecificMetadata")
            .and_then(|m| m.get("contentDetectedLangCode"))
            .and_then(Value::as_str)
            .filter(|code| !code.is_empty())
    }

    pub fn body_routing(&self) -> BodyRouting<'_> {
        BodyRouting {
            exchange: self.reply_to_exchange.as_deref(),
            routing_keys: self.reply_to_routing_keys.as_ref(),
        }
    }
}

/// Outbound reply body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReply {
    pub result_data: TaskData,
    pub result_type: ResultType,
    pub task_metadata: Map<String, Value>,
}

/// Job lifecycle as seen by the handler.
///
/// The three translation stages are reported by the translator while the
/// job runs; one job with several instances cycles through them repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Preprocessing,
    Translating,
    Postprocessing,
    Replying,
    Acked,
    Rejected,
}

impl From<Stage> for JobState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Preprocessing => Self::Preprocessing,
            Stage::Translating => Self::Translating,
            Stage::Postprocessing => Self::Postprocessing,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Preprocessing => "preprocessing",
            Self::Translating => "translating",
            Self::Postprocessing => "postprocessing",
            Self::Replying => "replying",
            Self::Acked => "acked",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Key identifying a message across redeliveries:
/// message id, else correlation id, else a hash of the body
pub fn retry_key(delivery: &Delivery) -> String {
    let properties = &delivery.properties;
    properties
        .message_id
        .clone()
        .filter(|id| !id.is_empty())
        .or_else(|| properties.correlation_id.clone().filter(|id| !id.is_empty()))
        .unwrap_or_else(|| format!("sha256:{:x}", Sha256::digest(&delivery.body)))
}

/// An accepted job
#[derive(Debug, Clone)]
pub struct Job {
    pub tag: u64,
    pub retry_key: String,
    pub message: JobMessage,
    pub reply: ReplyTarget,
    state: JobState,
    received: Instant,
}

impl Job {
    pub fn new(tag: u64, retry_key: String, message: JobMessage, reply: ReplyTarget) -> Self {
        Self {
            tag,
            retry_key,
            message,
            reply,
            state: JobState::Received,
            received: Instant::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to the next state
    pub fn advance(&mut self, state: JobState) {
        debug!("Job {} (#{}): {} → {}", self.retry_key, self.tag, self.state, state);
        self.state = state;
    }

    /// Time since the job was received
    pub fn elapsed(&self) -> Duration {
        self.received.elapsed()
    }

    /// Reply body for a finished translation
    pub fn reply_body(&self, result: TaskData) -> JobReply {
        JobReply {
            result_data: result,
            result_type: ResultType::FinalResult,
            task_metadata: self.message.task_metadata.clone(),
        }
    }
}
