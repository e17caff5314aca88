#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use agent_relay::config::RelaySettings;
use agent_relay::daemon::{build_router, AppState};
use agent_relay::error::{RelayError, Result};
use agent_relay::interfaces::broker::{
    Broker, BrokerMessage, SubscriptionConfig, SubscriptionHandle, TopicHandle,
};
use agent_relay::providers::memory::InMemoryBroker;

pub const TOKEN: &str = "token";

pub fn fast_settings() -> RelaySettings {
    RelaySettings {
        agent_poll: Duration::from_millis(150),
        request_poll: Duration::from_millis(150),
        resume_poll: Duration::from_millis(150),
        ..RelaySettings::default()
    }
}

pub fn router(broker: Arc<dyn Broker>) -> Router {
    build_router(AppState::new(broker, fast_settings(), TOKEN))
}

pub async fn call(app: &Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"));
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

pub fn parse_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}

/// Serves the relay on an ephemeral port; cancel the token to stop it.
pub async fn spawn_relay(broker: Arc<dyn Broker>) -> (String, CancellationToken) {
    let state = AppState::new(broker, fast_settings(), TOKEN);
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
            .unwrap();
    });
    (format!("http://{addr}"), shutdown)
}

/// Wraps the in-memory broker and fails selected operations.
#[derive(Default)]
pub struct FlakyBroker {
    pub inner: InMemoryBroker,
    pub fail_deletes: bool,
    pub fail_publish: bool,
    pub subscription_deletes: AtomicUsize,
    pub topic_deletes: AtomicUsize,
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn ensure_topic(&self, name: &str) -> Result<TopicHandle> {
        self.inner.ensure_topic(name).await
    }

    async fn ensure_subscription(
        &self,
        name: &str,
        topic: &TopicHandle,
        config: &SubscriptionConfig,
    ) -> Result<SubscriptionHandle> {
        self.inner.ensure_subscription(name, topic, config).await
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        if self.fail_publish {
            return Err(RelayError::Publish("broker unavailable".to_string()));
        }
        self.inner.publish(topic, payload, attributes).await
    }

    async fn receive_one(
        &self,
        subscription: &SubscriptionHandle,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<BrokerMessage>> {
        self.inner.receive_one(subscription, deadline, cancel).await
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool> {
        self.inner.subscription_exists(name).await
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.topic_deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(RelayError::Broker("topic store offline".to_string()));
        }
        self.inner.delete_topic(name).await
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.subscription_deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(RelayError::Broker("subscription store offline".to_string()));
        }
        self.inner.delete_subscription(name).await
    }
}
