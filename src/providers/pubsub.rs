use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{BrokerConfig, DEFAULT_PUBSUB_ENDPOINT};
use crate::error::{RelayError, Result};
use crate::interfaces::broker::{
    Broker, BrokerMessage, SubscriptionConfig, SubscriptionHandle, TopicHandle,
};

const EMPTY_PULL_BACKOFF: Duration = Duration::from_millis(200);
const MIN_ACK_DEADLINE_SECS: u64 = 10;
const MAX_ACK_DEADLINE_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    message_id: String,
}

/// Google Cloud Pub/Sub over its REST API. Works against the emulator when
/// `endpoint` points at it.
pub struct PubSubBroker {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: Option<String>,
}

impl PubSubBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let project_id = config
            .project_id
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RelayError::Config("pubsub broker needs project_id".to_string()))?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_PUBSUB_ENDPOINT.to_string());
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayError::Runtime(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project_id,
            access_token: config.access_token.clone(),
        })
    }

    fn topic_path(&self, name: &str) -> String {
        format!("projects/{}/topics/{name}", self.project_id)
    }

    fn request(&self, method: Method, resource: &str) -> RequestBuilder {
        let url = format!(
            "{}/v1/projects/{}/{resource}",
            self.endpoint, self.project_id
        );
        let mut request = self.http.request(method, url);
        if let Some(token) = self.access_token.as_deref() {
            if !token.trim().is_empty() {
                request = request.bearer_auth(token);
            }
        }
        request
    }

    async fn create(&self, resource: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .request(Method::PUT, resource)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Broker(e.to_string()))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        Err(RelayError::Broker(format!(
            "create {resource}: {}",
            describe(response).await
        )))
    }

    async fn delete(&self, resource: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, resource)
            .send()
            .await
            .map_err(|e| RelayError::Broker(e.to_string()))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RelayError::Broker(format!(
            "delete {resource}: {}",
            describe(response).await
        )))
    }

    async fn pull(&self, subscription: &str, timeout: Duration) -> Result<Option<ReceivedMessage>> {
        let response = self
            .request(Method::POST, &format!("subscriptions/{subscription}:pull"))
            .timeout(timeout)
            .json(&json!({"maxMessages": 1}))
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return Ok(None),
            Err(err) => return Err(RelayError::Receive(err.to_string())),
        };
        if !response.status().is_success() {
            return Err(RelayError::Receive(format!(
                "pull {subscription}: {}",
                describe(response).await
            )));
        }
        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Receive(e.to_string()))?;
        Ok(body.received_messages.into_iter().next())
    }

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> Result<()> {
        let response = self
            .request(
                Method::POST,
                &format!("subscriptions/{subscription}:acknowledge"),
            )
            .json(&json!({"ackIds": [ack_id]}))
            .send()
            .await
            .map_err(|e| RelayError::Receive(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RelayError::Receive(format!(
                "acknowledge {subscription}: {}",
                describe(response).await
            )))
        }
    }
}

async fn describe(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}

#[async_trait]
impl Broker for PubSubBroker {
    async fn ensure_topic(&self, name: &str) -> Result<TopicHandle> {
        self.create(&format!("topics/{name}"), json!({})).await?;
        Ok(TopicHandle::new(name))
    }

    async fn ensure_subscription(
        &self,
        name: &str,
        topic: &TopicHandle,
        config: &SubscriptionConfig,
    ) -> Result<SubscriptionHandle> {
        let ack_deadline = config
            .ack_deadline
            .as_secs()
            .clamp(MIN_ACK_DEADLINE_SECS, MAX_ACK_DEADLINE_SECS);
        let body = json!({
            "topic": self.topic_path(&topic.name),
            "ackDeadlineSeconds": ack_deadline,
            "expirationPolicy": {"ttl": format!("{}s", config.retention.as_secs())},
        });
        self.create(&format!("subscriptions/{name}"), body).await?;
        Ok(SubscriptionHandle::new(name, topic.name.clone()))
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        let body = json!({
            "messages": [{
                "data": BASE64.encode(&payload),
                "attributes": attributes,
            }]
        });
        let response = self
            .request(Method::POST, &format!("topics/{}:publish", topic.name))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RelayError::Publish(format!(
                "publish {}: {}",
                topic.name,
                describe(response).await
            )));
        }
        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        body.message_ids
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Publish("broker returned no message id".to_string()))
    }

    async fn receive_one(
        &self,
        subscription: &SubscriptionHandle,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<BrokerMessage>> {
        let expires_at = Instant::now() + deadline;
        loop {
            let remaining = expires_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let received = tokio::select! {
                result = self.pull(&subscription.name, remaining) => result?,
                _ = cancel.cancelled() => return Ok(None),
            };

            let Some(received) = received else {
                let pause =
                    EMPTY_PULL_BACKOFF.min(expires_at.saturating_duration_since(Instant::now()));
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => return Ok(None),
                }
                continue;
            };

            self.acknowledge(&subscription.name, &received.ack_id).await?;
            let payload = BASE64
                .decode(received.message.data.as_bytes())
                .map_err(|e| RelayError::Receive(format!("message payload: {e}")))?;
            debug!(
                subscription = %subscription.name,
                message_id = %received.message.message_id,
                "pulled message"
            );
            return Ok(Some(BrokerMessage {
                id: received.message.message_id,
                payload,
                attributes: received.message.attributes,
            }));
        }
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .request(Method::GET, &format!("subscriptions/{name}"))
            .send()
            .await
            .map_err(|e| RelayError::Broker(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(RelayError::Broker(format!(
                "get subscriptions/{name}: {}",
                describe(response).await
            ))),
        }
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.delete(&format!("topics/{name}")).await
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.delete(&format!("subscriptions/{name}")).await
    }
}
