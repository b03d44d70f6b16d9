pub mod engine;
pub mod ingest;
pub mod normalize;
pub mod status;

pub use engine::{Delivery, ProcessingOutcome, ReconcileResult, ReconciliationEngine};
pub use ingest::{InboundWebhook, IngestError, SignaturePolicy, WebhookOutcome, WebhookPipeline};
