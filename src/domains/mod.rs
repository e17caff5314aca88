pub mod address;
pub mod envelope;
