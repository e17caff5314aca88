use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domains::address::Id;
use crate::domains::envelope::Envelope;
use crate::error::{RelayError, Result};
use crate::interfaces::transport::{BoxedStream, Transport};
use crate::protocol::{self, AgentMessage};
use crate::services::relay_client::{RequesterClient, ResponderClient};

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Connects the relay's shared request queue to a local agent socket.
pub struct AgentBridge {
    agent: BoxedStream,
}

impl AgentBridge {
    pub fn new(agent: BoxedStream) -> Self {
        Self { agent }
    }

    pub async fn connect(transport: &dyn Transport) -> Result<Self> {
        Ok(Self::new(transport.connect().await?))
    }

    /// Produces the agent's answer to one frame. Pings are echoed without
    /// touching the agent.
    pub async fn answer(&mut self, request: &AgentMessage) -> Result<AgentMessage> {
        if request.is_ping() {
            return Ok(request.clone());
        }
        self.agent.write_all(request.as_bytes()).await?;
        self.agent.flush().await?;
        protocol::read(&mut self.agent).await
    }

    /// Runs until `cancel` fires or the agent connection breaks. Requests
    /// without a valid frame or reply address are skipped.
    pub async fn serve(&mut self, relay: &ResponderClient, cancel: &CancellationToken) -> Result<()> {
        loop {
            let received = tokio::select! {
                received = relay.receive() => received,
                _ = cancel.cancelled() => return Ok(()),
            };
            let request = match received {
                Ok(request) => request,
                Err(RelayError::Remote { status, body }) if status >= 500 => {
                    warn!(status, error = %body, "relay poll failed; retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                        _ = cancel.cancelled() => return Ok(()),
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let frame = match decode_request(&request) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(from = %request.from, error = %err, "invalid request skipped");
                    continue;
                }
            };
            debug!(from = %request.from, request = %frame, "<-");

            let reply = self.answer(&frame).await?;
            debug!(to = %request.from, reply = %reply, "->");
            // the requester may have gone away; only its own reply is lost
            match relay
                .send(&Envelope::new("", request.from.clone(), reply.as_bytes()))
                .await
            {
                Ok(()) => {}
                Err(RelayError::Remote { status, body }) => {
                    warn!(to = %request.from, status, error = %body, "reply not delivered");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn decode_request(envelope: &Envelope) -> Result<AgentMessage> {
    Id::parse(&envelope.from)?;
    AgentMessage::from_frame(envelope.payload()?)
}

/// Serves one local agent client over the relay until it disconnects.
pub async fn serve_connection<S>(stream: &mut S, relay: &RequesterClient) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    while let Some(request) = protocol::read_next(stream).await? {
        debug!(client = %relay.id(), request = %request, "<-");
        let reply = AgentMessage::from_frame(relay.call(request.as_bytes()).await?)?;
        debug!(client = %relay.id(), reply = %reply, "->");
        stream.write_all(reply.as_bytes()).await?;
        stream.flush().await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkStats {
    pub iterations: u32,
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

impl fmt::Display for BenchmarkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iterations min/avg/max = {:?}/{:?}/{:?}",
            self.iterations, self.min, self.avg, self.max
        )
    }
}

/// Measures ping round trips through the relay and a responder.
pub async fn benchmark(relay: &RequesterClient, iterations: u32) -> Result<BenchmarkStats> {
    if iterations == 0 {
        return Err(RelayError::Config(
            "benchmark needs at least one iteration".to_string(),
        ));
    }
    let ping = AgentMessage::ping();
    let mut min = Duration::MAX;
    let mut max = Duration::ZERO;
    let mut total = Duration::ZERO;

    info!(iterations, "running benchmark");
    for _ in 0..iterations {
        let start = Instant::now();
        let reply = relay.call(ping.as_bytes()).await?;
        if reply != ping.as_bytes() {
            return Err(RelayError::Runtime("invalid ping response".to_string()));
        }
        let elapsed = start.elapsed();
        total += elapsed;
        min = min.min(elapsed);
        max = max.max(elapsed);
    }

    Ok(BenchmarkStats {
        iterations,
        min,
        avg: total / iterations,
        max,
    })
}
