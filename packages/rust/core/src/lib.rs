//! Ingestion orchestration for taxwatch.
//!
//! Ties the scraper, the record store and the enrichment collaborator into a
//! single run ([`pipeline::Pipeline`]), plus the read-only status report.

pub mod enrichment;
pub mod notify;
pub mod ollama;
pub mod pipeline;
pub mod shutdown;
pub mod status;

pub use enrichment::EnrichmentGateway;
pub use notify::{LogNotifier, NotifySink};
pub use ollama::{ChatClient, ChatOptions, OllamaClient};
pub use pipeline::{
    Pipeline, PipelineOptions, ProgressReporter, RunOutcome, RunReport, RunStage, SilentProgress,
};
pub use shutdown::ShutdownSignal;
pub use status::{EnrichmentStatus, StatusReport, collect_status};
