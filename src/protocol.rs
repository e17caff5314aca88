//! SSH agent wire framing.
//!
//! ```text
//! +-----------+--------+-----------------+
//! | length    | type   | payload         |
//! | u32 BE    | u8     | length - 1      |
//! +-----------+--------+-----------------+
//! ```
//!
//! `length` counts the type byte and the payload, so a frame is always
//! `4 + length` bytes long.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};

pub const HEADER_LEN: usize = 4;
pub const MIN_LENGTH: u32 = 1;
pub const MAX_LENGTH: u32 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType(pub u8);

impl MessageType {
    pub const FAILURE: Self = Self(5);
    pub const SUCCESS: Self = Self(6);
    pub const REQUEST_IDENTITIES: Self = Self(11);
    pub const IDENTITIES_ANSWER: Self = Self(12);
    pub const SIGN_REQUEST: Self = Self(13);
    pub const SIGN_RESPONSE: Self = Self(14);
    pub const ADD_IDENTITY: Self = Self(17);
    pub const REMOVE_IDENTITY: Self = Self(18);
    pub const REMOVE_ALL_IDENTITIES: Self = Self(19);
    pub const ADD_SMARTCARD_KEY: Self = Self(20);
    pub const REMOVE_SMARTCARD_KEY: Self = Self(21);
    pub const LOCK: Self = Self(22);
    pub const UNLOCK: Self = Self(23);
    pub const ADD_ID_CONSTRAINED: Self = Self(25);
    pub const ADD_SMARTCARD_KEY_CONSTRAINED: Self = Self(26);
    pub const EXTENSION: Self = Self(27);
    pub const EXTENSION_FAILURE: Self = Self(28);
    /// Relay liveness probe; never forwarded to the real agent.
    pub const PING: Self = Self(255);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::FAILURE => "SSH_AGENT_FAILURE",
            Self::SUCCESS => "SSH_AGENT_SUCCESS",
            Self::REQUEST_IDENTITIES => "SSH_AGENTC_REQUEST_IDENTITIES",
            Self::IDENTITIES_ANSWER => "SSH_AGENT_IDENTITIES_ANSWER",
            Self::SIGN_REQUEST => "SSH_AGENTC_SIGN_REQUEST",
            Self::SIGN_RESPONSE => "SSH_AGENT_SIGN_RESPONSE",
            Self::ADD_IDENTITY => "SSH_AGENTC_ADD_IDENTITY",
            Self::REMOVE_IDENTITY => "SSH_AGENTC_REMOVE_IDENTITY",
            Self::REMOVE_ALL_IDENTITIES => "SSH_AGENTC_REMOVE_ALL_IDENTITIES",
            Self::ADD_SMARTCARD_KEY => "SSH_AGENTC_ADD_SMARTCARD_KEY",
            Self::REMOVE_SMARTCARD_KEY => "SSH_AGENTC_REMOVE_SMARTCARD_KEY",
            Self::LOCK => "SSH_AGENTC_LOCK",
            Self::UNLOCK => "SSH_AGENTC_UNLOCK",
            Self::ADD_ID_CONSTRAINED => "SSH_AGENTC_ADD_ID_CONSTRAINED",
            Self::ADD_SMARTCARD_KEY_CONSTRAINED => "SSH_AGENTC_ADD_SMARTCARD_KEY_CONSTRAINED",
            Self::EXTENSION => "SSH_AGENTC_EXTENSION",
            Self::EXTENSION_FAILURE => "SSH_AGENT_EXTENSION_FAILURE",
            Self::PING => "PING",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{{Type {}}}", self.0),
        }
    }
}

/// A complete frame, length prefix included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage(Vec<u8>);

impl AgentMessage {
    pub fn new(msg_type: MessageType, data: &[u8]) -> Result<Self> {
        let length = u32::try_from(data.len() + 1).unwrap_or(u32::MAX);
        check_length(length)?;
        let mut frame = Vec::with_capacity(HEADER_LEN + length as usize);
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(msg_type.0);
        frame.extend_from_slice(data);
        Ok(Self(frame))
    }

    pub fn ping() -> Self {
        Self(vec![0, 0, 0, 1, MessageType::PING.0])
    }

    /// Validates that `frame` holds exactly one well-formed message.
    pub fn from_frame(frame: Vec<u8>) -> Result<Self> {
        if frame.len() < HEADER_LEN + 1 {
            return Err(RelayError::Framing {
                length: frame.len().saturating_sub(HEADER_LEN) as u32,
            });
        }
        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        check_length(length)?;
        if frame.len() != HEADER_LEN + length as usize {
            return Err(RelayError::Framing { length });
        }
        Ok(Self(frame))
    }

    pub fn msg_type(&self) -> MessageType {
        MessageType(self.0[HEADER_LEN])
    }

    pub fn data(&self) -> &[u8] {
        &self.0[HEADER_LEN + 1..]
    }

    pub fn is_ping(&self) -> bool {
        self.msg_type() == MessageType::PING
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Display for AgentMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg_type = self.msg_type();
        match msg_type {
            MessageType::FAILURE | MessageType::SUCCESS => write!(f, "{msg_type}"),
            _ if !self.data().is_empty() => {
                write!(f, "{msg_type}: {} bytes", self.data().len())
            }
            _ => write!(f, "{msg_type}"),
        }
    }
}

fn check_length(length: u32) -> Result<()> {
    if (MIN_LENGTH..=MAX_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(RelayError::Framing { length })
    }
}

/// Reads one frame. The length prefix is validated before the body is read.
pub async fn read<R>(reader: &mut R) -> Result<AgentMessage>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_next(reader)
        .await?
        .ok_or_else(|| RelayError::Io("unexpected end of stream".to_string()))
}

/// Like [`read`], but a stream that ends cleanly between frames yields `None`.
pub async fn read_next<R>(reader: &mut R) -> Result<Option<AgentMessage>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await?;
    let length = u32::from_be_bytes(header);
    check_length(length)?;

    let mut frame = vec![0u8; HEADER_LEN + length as usize];
    frame[..HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(Some(AgentMessage(frame)))
}
