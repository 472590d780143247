/*!
 * Job document model.
 *
 * `{instances: [{metadata: {language}, body: {sentences: [{tokens: [...]}]}}]}`
 *
 * Unknown fields at every level are carried through unchanged so that a
 * reply echoes whatever the producer put into the document.
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::language_utils;

/// A structured job document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Language instances of the same content
    #[serde(default)]
    pub instances: Vec<Instance>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Instances whose language matches `language` (2- or 3-letter codes)
    pub fn instances_in<'a>(&'a self, language: &'a str) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances
            .iter()
            .filter(move |instance| language_utils::language_codes_match(&instance.metadata.language, language))
    }

    /// Append translated instances; existing instances are never touched
    pub fn append_instances(&mut self, instances: Vec<Instance>) {
        self.instances.extend(instances);
    }
}

/// One language version of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub metadata: InstanceMetadata,

    #[serde(default)]
    pub body: Body,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Instance {
    /// Copy of this instance in another language with a new body
    pub fn translated(&self, language: &str, sentences: Vec<Sentence>) -> Self {
        let mut instance = self.clone();
        instance.metadata.language = language.to_string();
        instance.body = Body {
            sentences,
            extra: self.body.extra.clone(),
        };
        instance
    }
}

/// Instance metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default)]
    pub language: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Instance body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub sentences: Vec<Sentence>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A tokenized sentence
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sentence {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl Sentence {
    /// Token texts in order
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|t| t.token.token.as_str())
    }
}

/// A token with its features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: Token,

    #[serde(default)]
    pub features: Vec<Value>,
}

/// Token text and its zero-based position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub offset: usize,
    pub token: String,
}
