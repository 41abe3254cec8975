//! Notification sink for newly ingested concepts.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use taxwatch_shared::{Concept, Result};

/// Receives the concepts saved by a run.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, concepts: &[Concept], attachment: Option<&Path>) -> Result<()>;
}

/// Writes a digest of new concepts to the log.
pub struct LogNotifier;

#[async_trait]
impl NotifySink for LogNotifier {
    async fn notify(&self, concepts: &[Concept], attachment: Option<&Path>) -> Result<()> {
        info!(
            count = concepts.len(),
            attachment = ?attachment,
            "new concepts published"
        );
        for concept in concepts {
            info!(
                date = %concept.date,
                theme = %concept.theme,
                title = %concept.title,
                link = %concept.link,
                "new concept"
            );
        }
        Ok(())
    }
}
