use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::error::{RelayError, Result};
use crate::interfaces::broker::Broker;
use crate::providers::memory::InMemoryBroker;
use crate::providers::pubsub::PubSubBroker;

pub fn build_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    let kind = config
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("memory");
    match kind {
        "memory" => Ok(Arc::new(InMemoryBroker::new())),
        "pubsub" => Ok(Arc::new(PubSubBroker::new(config)?)),
        other => Err(RelayError::Config(format!("unknown broker kind {other:?}"))),
    }
}
