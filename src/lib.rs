pub mod config;
pub mod daemon;
pub mod domains;
pub mod error;
pub mod factories;
pub mod interfaces;
pub mod protocol;
pub mod providers;
pub mod services;

pub use crate::config::{Config, RelaySettings};
pub use crate::domains::address::Id;
pub use crate::domains::envelope::Envelope;
pub use crate::error::{RelayError, Result};
pub use crate::interfaces::broker::{Broker, BrokerMessage};
pub use crate::protocol::AgentMessage;
pub use crate::services::relay_client::{RequesterClient, ResponderClient};
