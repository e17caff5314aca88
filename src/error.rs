use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("malformed id: {0}")]
    MalformedId(String),
    #[error("unknown client {0}")]
    UnknownClient(String),
    #[error("random source error: {0}")]
    RandomSource(String),
    #[error("base64 decode error: {0}")]
    Base64Decode(String),
    #[error("invalid message length {length}")]
    Framing { length: u32 },
    #[error("destination {envelope} does not match {path}")]
    DestinationMismatch { path: String, envelope: String },
    #[error("{}", remote_message(*status, body))]
    Remote { status: u16, body: String },
}

impl RelayError {
    /// Errors caused by the caller's input. The daemon answers these with
    /// `400 Bad Request`; everything else is a `500`.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::Serialization(_)
                | RelayError::MalformedId(_)
                | RelayError::UnknownClient(_)
                | RelayError::Base64Decode(_)
                | RelayError::Framing { .. }
                | RelayError::DestinationMismatch { .. }
        )
    }
}

fn remote_message(status: u16, body: &str) -> String {
    if body.is_empty() {
        format!("HTTP status {status}")
    } else {
        format!("{status}: {body}")
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
