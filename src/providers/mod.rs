pub mod memory;
pub mod pubsub;
