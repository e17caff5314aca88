use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelaySettings;
use crate::domains::address::Id;
use crate::domains::envelope::{self, ClientRegistration, Envelope};
use crate::error::{RelayError, Result};
use crate::interfaces::broker::{Broker, SubscriptionHandle, TopicHandle, RESPONSE_ATTRIBUTE};

/// How a request/poll exchange ended when no reply was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Reply(Envelope),
    /// A request was just published and is still in flight.
    Accepted,
    /// A resume poll saw nothing before its deadline.
    TimedOut,
}

/// Requester side of the relay. Every client owns a private topic and
/// subscription derived from its id; requests go to the shared inbound topic.
#[derive(Clone)]
pub struct ClientService {
    broker: Arc<dyn Broker>,
    settings: Arc<RelaySettings>,
}

impl ClientService {
    pub fn new(broker: Arc<dyn Broker>, settings: Arc<RelaySettings>) -> Self {
        Self { broker, settings }
    }

    pub async fn register(&self) -> Result<ClientRegistration> {
        let id = Id::generate()?;
        let topic = self.broker.ensure_topic(&id.topic()).await?;
        self.broker
            .ensure_subscription(&id.subscription(), &topic, &self.settings.subscription_config())
            .await?;
        info!(client = %id, "client registered");
        Ok(ClientRegistration {
            url: format!("/clients/{id}"),
            id: id.to_string(),
        })
    }

    /// Publishes the request payload with `client` as the reply address.
    /// Nothing is published for a client without a reply subscription.
    pub async fn submit(&self, client: &Id, envelope: &Envelope) -> Result<String> {
        let destination = envelope.to_id()?;
        let payload = envelope::decode(&envelope.data)?;
        if !self.broker.subscription_exists(&client.subscription()).await? {
            return Err(RelayError::UnknownClient(client.to_string()));
        }

        let mut attributes = HashMap::new();
        attributes.insert(RESPONSE_ATTRIBUTE.to_string(), client.to_string());
        let topic = TopicHandle::new(self.settings.inbound_topic.clone());
        let message_id = self.broker.publish(&topic, payload, attributes).await?;
        debug!(
            client = %client,
            to = ?destination.map(|id| id.to_string()),
            message_id = %message_id,
            "request published"
        );
        Ok(message_id)
    }

    pub async fn await_reply(
        &self,
        client: &Id,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>> {
        let subscription = SubscriptionHandle::new(client.subscription(), client.topic());
        let message = self
            .broker
            .receive_one(&subscription, deadline, cancel)
            .await?;
        Ok(message.map(|message| {
            let from = message.response_address().unwrap_or_default().to_string();
            Envelope::new(from, client.to_string(), &message.payload)
        }))
    }

    /// `POST`: publish, then wait for the reply.
    pub async fn request(
        &self,
        client: &Id,
        envelope: &Envelope,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        self.submit(client, envelope).await?;
        let reply = self
            .await_reply(client, self.settings.request_poll, cancel)
            .await?;
        Ok(reply.map(PollOutcome::Reply).unwrap_or(PollOutcome::Accepted))
    }

    /// `GET`: wait for a reply to an earlier request.
    pub async fn resume(&self, client: &Id, cancel: &CancellationToken) -> Result<PollOutcome> {
        let reply = self
            .await_reply(client, self.settings.resume_poll, cancel)
            .await?;
        Ok(reply.map(PollOutcome::Reply).unwrap_or(PollOutcome::TimedOut))
    }

    /// Removes the client's subscription and topic. Both deletions are always
    /// attempted; failures are reported together.
    pub async fn deregister(&self, client: &Id) -> Result<()> {
        let mut failures = Vec::new();
        let subscription = client.subscription();
        if let Err(err) = self.broker.delete_subscription(&subscription).await {
            failures.push(format!("delete subscription {subscription}: {err}"));
        }
        let topic = client.topic();
        if let Err(err) = self.broker.delete_topic(&topic).await {
            failures.push(format!("delete topic {topic}: {err}"));
        }

        if failures.is_empty() {
            info!(client = %client, "client deregistered");
            Ok(())
        } else {
            let message = failures.join("; ");
            warn!(client = %client, error = %message, "client deregistration failed");
            Err(RelayError::Broker(message))
        }
    }
}
