use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::interfaces::broker::SubscriptionConfig;

pub const DEFAULT_INBOUND_TOPIC: &str = "relay-requests";
pub const DEFAULT_INBOUND_SUBSCRIPTION: &str = "requests";
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// `memory` or `pubsub`.
    pub kind: Option<String>,
    pub endpoint: Option<String>,
    pub project_id: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueConfig {
    pub inbound_topic: Option<String>,
    pub inbound_subscription: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TimeoutConfig {
    pub agent_poll_ms: Option<u64>,
    pub request_poll_ms: Option<u64>,
    pub resume_poll_ms: Option<u64>,
    pub ack_deadline_ms: Option<u64>,
    pub retention_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub broker: Option<BrokerConfig>,
    pub queues: Option<QueueConfig>,
    pub timeouts: Option<TimeoutConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| RelayError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| RelayError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn broker(&self) -> BrokerConfig {
        self.broker.clone().unwrap_or_default()
    }

    pub fn settings(&self) -> RelaySettings {
        let defaults = RelaySettings::default();
        let queues = self.queues.clone().unwrap_or_default();
        let timeouts = self.timeouts.clone().unwrap_or_default();
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };

        RelaySettings {
            inbound_topic: queues
                .inbound_topic
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.inbound_topic),
            inbound_subscription: queues
                .inbound_subscription
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.inbound_subscription),
            agent_poll: millis(timeouts.agent_poll_ms, defaults.agent_poll),
            request_poll: millis(timeouts.request_poll_ms, defaults.request_poll),
            resume_poll: millis(timeouts.resume_poll_ms, defaults.resume_poll),
            ack_deadline: millis(timeouts.ack_deadline_ms, defaults.ack_deadline),
            retention: millis(timeouts.retention_ms, defaults.retention),
        }
    }
}

/// Resolved relay parameters handed to the request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Shared rendezvous topic every requester publishes to.
    pub inbound_topic: String,
    pub inbound_subscription: String,
    pub agent_poll: Duration,
    /// Wait after a fresh request has been published.
    pub request_poll: Duration,
    /// Wait on a bare resume poll.
    pub resume_poll: Duration,
    pub ack_deadline: Duration,
    pub retention: Duration,
}

impl RelaySettings {
    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            ack_deadline: self.ack_deadline,
            retention: self.retention,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            inbound_topic: DEFAULT_INBOUND_TOPIC.to_string(),
            inbound_subscription: DEFAULT_INBOUND_SUBSCRIPTION.to_string(),
            agent_poll: Duration::from_secs(30),
            request_poll: Duration::from_secs(30),
            resume_poll: Duration::from_secs(15),
            ack_deadline: Duration::from_secs(10),
            retention: Duration::from_secs(25 * 60 * 60),
        }
    }
}
