pub mod client_ip;
pub mod metrics;
pub mod tracing;
