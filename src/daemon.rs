use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, RelaySettings};
use crate::domains::address::Id;
use crate::domains::envelope::Envelope;
use crate::error::{RelayError, Result};
use crate::factories::broker_factory::build_broker;
use crate::interfaces::broker::Broker;
use crate::services::agents::AgentService;
use crate::services::clients::{ClientService, PollOutcome};

#[derive(Clone)]
pub struct AppState {
    pub agents: AgentService,
    pub clients: ClientService,
    pub token: String,
    /// Cancelled on shutdown; every long poll waits on a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>, settings: RelaySettings, token: &str) -> Self {
        let settings = Arc::new(settings);
        Self {
            agents: AgentService::new(broker.clone(), settings.clone()),
            clients: ClientService::new(broker, settings),
            token: token.to_string(),
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", post(register_agent))
        .route("/agents/:name", get(poll_agent).post(submit_reply))
        .route("/clients", post(register_client))
        .route(
            "/clients/:id",
            get(resume_client)
                .post(request_client)
                .delete(deregister_client),
        )
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn register_agent(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    match state.agents.register().await {
        Ok(registration) => (StatusCode::OK, Json(registration)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn poll_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    if name != state.agents.inbound_subscription() {
        return (StatusCode::NOT_FOUND, format!("unknown agent queue {name}")).into_response();
    }

    let cancel = state.shutdown.child_token();
    match state.agents.poll(&cancel).await {
        Ok(Some(envelope)) => (StatusCode::OK, Json(envelope)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn submit_reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(requester): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    let result = async {
        let envelope = Envelope::from_json(&body)?;
        state.agents.reply(&requester, &envelope).await
    }
    .await;
    match result {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

async fn register_client(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    match state.clients.register().await {
        Ok(registration) => (StatusCode::OK, Json(registration)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn request_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    let cancel = state.shutdown.child_token();
    let result = async {
        let client = Id::parse(&id)?;
        let envelope = Envelope::from_json(&body)?;
        state.clients.request(&client, &envelope, &cancel).await
    }
    .await;
    poll_response(result)
}

async fn resume_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    let cancel = state.shutdown.child_token();
    let result = async {
        let client = Id::parse(&id)?;
        state.clients.resume(&client, &cancel).await
    }
    .await;
    poll_response(result)
}

async fn deregister_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err;
    }
    let result = async {
        let client = Id::parse(&id)?;
        state.clients.deregister(&client).await
    }
    .await;
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

fn poll_response(result: Result<PollOutcome>) -> Response {
    match result {
        Ok(PollOutcome::Reply(envelope)) => (StatusCode::OK, Json(envelope)).into_response(),
        Ok(PollOutcome::Accepted) => StatusCode::ACCEPTED.into_response(),
        Ok(PollOutcome::TimedOut) => StatusCode::REQUEST_TIMEOUT.into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: RelayError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string()).into_response()
}

fn authorize(headers: &HeaderMap, token: &str) -> std::result::Result<(), Response> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("");

    if bearer == token {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "Unauthorized").into_response())
    }
}

pub async fn run(host: &str, port: u16, config: &Config, token: &str) -> Result<()> {
    run_with_shutdown(host, port, config, token, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(
    host: &str,
    port: u16,
    config: &Config,
    token: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let broker = build_broker(&config.broker())?;
    let state = AppState::new(broker, config.settings(), token);
    let polls = state.shutdown.clone();
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::Runtime(e.to_string()))?;
    info!(%addr, "relay listening");
    let shutdown = async move {
        shutdown.await;
        polls.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RelayError::Runtime(e.to_string()))?;

    Ok(())
}
