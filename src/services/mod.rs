pub mod agents;
pub mod bridge;
pub mod clients;
pub mod relay_client;
pub mod transport;
