use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Attribute carrying the address a reply should be published to.
pub const RESPONSE_ATTRIBUTE: &str = "response";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicHandle {
    pub name: String,
}

impl TopicHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub name: String,
    pub topic: String,
}

impl SubscriptionHandle {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub ack_deadline: Duration,
    /// How long an idle subscription survives before the broker reclaims it.
    pub retention: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMessage {
    pub id: String,
    pub payload: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

impl BrokerMessage {
    pub fn response_address(&self) -> Option<&str> {
        self.attributes
            .get(RESPONSE_ATTRIBUTE)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Topic/subscription pub-sub contract the relay runs on.
///
/// Creation and deletion are idempotent. `receive_one` hands back at most one
/// message, already acknowledged, and returns `Ok(None)` when `deadline`
/// elapses or `cancel` fires first.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn ensure_topic(&self, name: &str) -> Result<TopicHandle>;

    async fn ensure_subscription(
        &self,
        name: &str,
        topic: &TopicHandle,
        config: &SubscriptionConfig,
    ) -> Result<SubscriptionHandle>;

    async fn publish(
        &self,
        topic: &TopicHandle,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String>;

    async fn receive_one(
        &self,
        subscription: &SubscriptionHandle,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<BrokerMessage>>;

    async fn subscription_exists(&self, name: &str) -> Result<bool>;

    async fn delete_topic(&self, name: &str) -> Result<()>;

    async fn delete_subscription(&self, name: &str) -> Result<()>;
}
