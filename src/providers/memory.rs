use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};
use crate::interfaces::broker::{
    Broker, BrokerMessage, SubscriptionConfig, SubscriptionHandle, TopicHandle,
};

struct Queue {
    topic: String,
    messages: VecDeque<BrokerMessage>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct State {
    topics: HashSet<String>,
    subscriptions: HashMap<String, Queue>,
    next_id: u64,
}

/// In-process broker. Every subscription bound to a topic gets its own copy of
/// each published message; a message leaves the queue the moment it is
/// received, which doubles as the acknowledgement.
#[derive(Default)]
pub struct InMemoryBroker {
    state: RwLock<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_topic(&self, name: &str) -> bool {
        self.state.read().await.topics.contains(name)
    }

    pub async fn has_subscription(&self, name: &str) -> bool {
        self.state.read().await.subscriptions.contains_key(name)
    }

    /// Number of undelivered messages, or `None` for an unknown subscription.
    pub async fn pending(&self, subscription: &str) -> Option<usize> {
        let guard = self.state.read().await;
        guard
            .subscriptions
            .get(subscription)
            .map(|queue| queue.messages.len())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_topic(&self, name: &str) -> Result<TopicHandle> {
        let mut guard = self.state.write().await;
        guard.topics.insert(name.to_string());
        Ok(TopicHandle::new(name))
    }

    async fn ensure_subscription(
        &self,
        name: &str,
        topic: &TopicHandle,
        _config: &SubscriptionConfig,
    ) -> Result<SubscriptionHandle> {
        let mut guard = self.state.write().await;
        if let Some(existing) = guard.subscriptions.get(name) {
            return Ok(SubscriptionHandle::new(name, existing.topic.clone()));
        }
        if !guard.topics.contains(&topic.name) {
            return Err(RelayError::Broker(format!("topic {} not found", topic.name)));
        }
        guard.subscriptions.insert(
            name.to_string(),
            Queue {
                topic: topic.name.clone(),
                messages: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(SubscriptionHandle::new(name, topic.name.clone()))
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        let mut guard = self.state.write().await;
        if !guard.topics.contains(&topic.name) {
            return Err(RelayError::Publish(format!("topic {} not found", topic.name)));
        }
        guard.next_id += 1;
        let message = BrokerMessage {
            id: guard.next_id.to_string(),
            payload,
            attributes,
        };
        for queue in guard.subscriptions.values_mut() {
            if queue.topic == topic.name {
                queue.messages.push_back(message.clone());
                queue.notify.notify_one();
            }
        }
        Ok(message.id)
    }

    async fn receive_one(
        &self,
        subscription: &SubscriptionHandle,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<BrokerMessage>> {
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        loop {
            let notify = {
                let mut guard = self.state.write().await;
                let queue = guard.subscriptions.get_mut(&subscription.name).ok_or_else(|| {
                    RelayError::Receive(format!("subscription {} not found", subscription.name))
                })?;
                if let Some(message) = queue.messages.pop_front() {
                    return Ok(Some(message));
                }
                queue.notify.clone()
            };

            tokio::select! {
                _ = notify.notified() => continue,
                _ = &mut expiry => return Ok(None),
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool> {
        Ok(self.has_subscription(name).await)
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.topics.remove(name);
        Ok(())
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        if let Some(queue) = guard.subscriptions.remove(name) {
            queue.notify.notify_waiters();
        }
        Ok(())
    }
}
