//! Content topics and the shard routing topics they map onto

use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, DeliveryResult};

/// Upper bound on the number of shards a cluster can be partitioned into
pub const MAX_SHARDS: u16 = 1024;

/// A content topic such as `/myapp/1/chat/proto`
///
/// Topics are free-form, but must be non-empty, start with `/` and contain
/// no whitespace or control characters. Topics in the canonical
/// `/{application}/{version}/{name}/{encoding}` shape can be split into
/// [`ContentTopicParts`].
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentTopic(String);

/// The segments of a canonical content topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentTopicParts<'a> {
    pub application: &'a str,
    pub version: &'a str,
    pub name: &'a str,
    pub encoding: &'a str,
}

impl ContentTopic {
    /// Validate and wrap a topic string
    pub fn new(topic: impl Into<String>) -> DeliveryResult<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(DeliveryError::InvalidTopic("topic is empty".into()));
        }
        if !topic.starts_with('/') {
            return Err(DeliveryError::InvalidTopic(format!(
                "{topic:?} must start with '/'"
            )));
        }
        if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DeliveryError::InvalidTopic(format!(
                "{topic:?} contains whitespace or control characters"
            )));
        }
        Ok(Self(topic))
    }

    /// The topic text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a canonical four-segment topic
    pub fn parts(&self) -> Option<ContentTopicParts<'_>> {
        let mut segments = self.0[1..].split('/');
        let application = segments.next()?;
        let version = segments.next()?;
        let name = segments.next()?;
        let encoding = segments.next()?;
        if segments.next().is_some() {
            return None;
        }
        if [application, version, name, encoding].iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(ContentTopicParts {
            application,
            version,
            name,
            encoding,
        })
    }

    /// Stable 64-bit key used to pick a shard for this topic
    ///
    /// Canonical topics hash only application and version so every topic
    /// of one application lands on the same shard.
    pub fn shard_key(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        match self.parts() {
            Some(parts) => {
                hasher.update(parts.application.as_bytes());
                hasher.update(parts.version.as_bytes());
            }
            None => {
                hasher.update(self.0.as_bytes());
            }
        }
        let digest = hasher.finalize();
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest.as_bytes()[24..32]);
        u64::from_be_bytes(key)
    }
}

impl TryFrom<String> for ContentTopic {
    type Error = DeliveryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentTopic> for String {
    fn from(topic: ContentTopic) -> Self {
        topic.0
    }
}

impl FromStr for ContentTopic {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContentTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The relay routing topic for one shard of a cluster
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("/waku/2/rs/{cluster_id}/{shard}")]
pub struct PubsubTopic {
    pub cluster_id: u16,
    pub shard: u16,
}

impl PubsubTopic {
    pub fn new(cluster_id: u16, shard: u16) -> Self {
        Self { cluster_id, shard }
    }
}
