use std::time::Duration;

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Method, StatusCode};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domains::address::Id;
use crate::domains::envelope::{AgentRegistration, ClientRegistration, Envelope};
use crate::error::{RelayError, Result};

/// Must outlast the relay's longest long-poll window.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

struct RelayHttp {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

struct RelayResponse {
    status: StatusCode,
    body: Bytes,
}

impl RelayResponse {
    fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    fn into_error(self) -> RelayError {
        RelayError::Remote {
            status: self.status.as_u16(),
            body: String::from_utf8_lossy(&self.body).trim_end().to_string(),
        }
    }
}

impl RelayHttp {
    fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Runtime(e.to_string()))?;
        Ok(Self {
            client,
            base_url: canonize_endpoint(base_url),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = join_url(&self.base_url, path);
        let mut request = self.client.request(method, url);
        if !self.token.trim().is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.token));
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<RelayResponse> {
        let response = request
            .send()
            .await
            .map_err(|e: reqwest::Error| RelayError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e: reqwest::Error| RelayError::Http(e.to_string()))?;
        Ok(RelayResponse { status, body })
    }
}

/// Caller side of a relayed exchange: one private reply queue per client.
pub struct RequesterClient {
    http: RelayHttp,
    url: String,
    id: Id,
    destination: Option<Id>,
}

impl RequesterClient {
    pub async fn connect(base_url: &str, token: &str) -> Result<Self> {
        Self::connect_with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        base_url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = RelayHttp::new(base_url, token, timeout)?;
        let response = http.send(http.request(Method::POST, "/clients")).await?;
        if response.status != StatusCode::OK {
            return Err(response.into_error());
        }
        let registration: ClientRegistration = response.json()?;
        let id = Id::parse(&registration.id)?;
        debug!(client = %id, url = %registration.url, "connected to relay");
        Ok(Self {
            http,
            url: registration.url,
            id,
            destination: None,
        })
    }

    /// Addresses subsequent calls to a specific responder.
    pub fn with_destination(mut self, destination: Id) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `payload` and keeps polling until the reply arrives. There is no
    /// retry limit; wrap the call in a timeout to bound it.
    pub async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let to = self
            .destination
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let envelope = Envelope::new(self.id.to_string(), to, payload);
        let mut response = self
            .http
            .send(self.http.request(Method::POST, &self.url).json(&envelope))
            .await?;

        loop {
            match response.status {
                StatusCode::OK => {
                    let reply: Envelope = response.json()?;
                    return reply.payload();
                }
                StatusCode::ACCEPTED | StatusCode::REQUEST_TIMEOUT => {
                    debug!(client = %self.id, status = %response.status, "reply pending");
                    response = self
                        .http
                        .send(self.http.request(Method::GET, &self.url))
                        .await?;
                }
                _ => return Err(response.into_error()),
            }
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        let response = self
            .http
            .send(self.http.request(Method::DELETE, &self.url))
            .await?;
        if response.status == StatusCode::OK {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}

/// Agent side of the relay: long-polls the shared request queue and posts
/// replies back to the requester.
pub struct ResponderClient {
    http: RelayHttp,
    url: String,
}

impl ResponderClient {
    pub async fn connect(base_url: &str, token: &str) -> Result<Self> {
        Self::connect_with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        base_url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = RelayHttp::new(base_url, token, timeout)?;
        let response = http.send(http.request(Method::POST, "/agents")).await?;
        if response.status != StatusCode::OK {
            return Err(response.into_error());
        }
        let registration: AgentRegistration = response.json()?;
        debug!(url = %registration.url, "agent connected to relay");
        Ok(Self {
            http,
            url: registration.url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Blocks until a request arrives; empty polls are retried.
    pub async fn receive(&self) -> Result<Envelope> {
        loop {
            let response = self
                .http
                .send(self.http.request(Method::GET, &self.url))
                .await?;
            match response.status {
                StatusCode::OK => return response.json(),
                StatusCode::NO_CONTENT => continue,
                _ => return Err(response.into_error()),
            }
        }
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let requester = Id::parse(&envelope.to)?;
        let response = self
            .http
            .send(
                self.http
                    .request(Method::POST, &format!("/agents/{requester}"))
                    .json(envelope),
            )
            .await?;
        if response.status == StatusCode::OK {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}

fn canonize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
