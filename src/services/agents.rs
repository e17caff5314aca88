use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelaySettings;
use crate::domains::address::Id;
use crate::domains::envelope::{self, AgentRegistration, Envelope};
use crate::error::{RelayError, Result};
use crate::interfaces::broker::{Broker, SubscriptionHandle, TopicHandle, RESPONSE_ATTRIBUTE};

/// Responder side of the relay: agents register, long-poll the shared inbound
/// queue for requests, and publish replies to the requester's private topic.
#[derive(Clone)]
pub struct AgentService {
    broker: Arc<dyn Broker>,
    settings: Arc<RelaySettings>,
}

impl AgentService {
    pub fn new(broker: Arc<dyn Broker>, settings: Arc<RelaySettings>) -> Self {
        Self { broker, settings }
    }

    pub fn inbound_subscription(&self) -> &str {
        &self.settings.inbound_subscription
    }

    fn inbound(&self) -> SubscriptionHandle {
        SubscriptionHandle::new(
            self.settings.inbound_subscription.clone(),
            self.settings.inbound_topic.clone(),
        )
    }

    pub async fn register(&self) -> Result<AgentRegistration> {
        let id = Id::generate()?;
        let topic = self.broker.ensure_topic(&self.settings.inbound_topic).await?;
        let subscription = self
            .broker
            .ensure_subscription(
                &self.settings.inbound_subscription,
                &topic,
                &self.settings.subscription_config(),
            )
            .await?;
        info!(agent = %id, queue = %subscription.name, "agent registered");
        Ok(AgentRegistration {
            url: format!("/agents/{}", subscription.name),
        })
    }

    /// Waits for the next request on the shared queue. The returned envelope's
    /// `from` is the requester's address.
    pub async fn poll(&self, cancel: &CancellationToken) -> Result<Option<Envelope>> {
        let message = self
            .broker
            .receive_one(&self.inbound(), self.settings.agent_poll, cancel)
            .await?;
        let Some(message) = message else {
            return Ok(None);
        };

        let Some(from) = message.response_address() else {
            warn!(message_id = %message.id, "request without response address dropped");
            return Err(RelayError::Broker(format!(
                "message {} has no {RESPONSE_ATTRIBUTE} attribute",
                message.id
            )));
        };
        debug!(message_id = %message.id, from, bytes = message.payload.len(), "request delivered");
        Ok(Some(Envelope::new(from, "", &message.payload)))
    }

    /// Publishes an agent's reply to the requester named by `requester`.
    /// A non-empty `envelope.to` must name the same requester.
    pub async fn reply(&self, requester: &str, envelope: &Envelope) -> Result<String> {
        let destination = Id::parse(requester)?;
        if let Some(to) = envelope.to_id()? {
            if to != destination {
                return Err(RelayError::DestinationMismatch {
                    path: destination.to_string(),
                    envelope: to.to_string(),
                });
            }
        }
        let payload = envelope::decode(&envelope.data)?;

        let mut attributes = HashMap::new();
        if let Some(from) = envelope.from_id()? {
            attributes.insert(RESPONSE_ATTRIBUTE.to_string(), from.to_string());
        }
        let message_id = self
            .broker
            .publish(&TopicHandle::new(destination.topic()), payload, attributes)
            .await?;
        debug!(client = %destination, message_id = %message_id, "reply published");
        Ok(message_id)
    }
}
