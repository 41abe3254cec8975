//! Read-only health report for the `status` command.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use taxwatch_shared::Result;
use taxwatch_storage::{LockMarker, RecordStore};

use crate::ollama::ChatClient;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub store_path: PathBuf,
    pub concepts: usize,
    pub themes: usize,
    pub store_locked: bool,
    pub run_locked: bool,
    /// Contents of the run lock marker, when present.
    pub run_lock_holder: Option<String>,
    /// `None` when enrichment is disabled in the configuration.
    pub enrichment: Option<EnrichmentStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentStatus {
    pub model: String,
    pub available: bool,
    /// Whether the configured model shows up in the service's model list.
    pub model_installed: bool,
}

/// Gather counts and lock state from the store, then query the chat service.
pub async fn collect_status(
    store: &dyn RecordStore,
    run_lock_path: &Path,
    chat: Option<&dyn ChatClient>,
) -> Result<StatusReport> {
    let concepts = store.count()?;
    let themes = store.themes()?.len();

    let enrichment = match chat {
        Some(client) => Some(check_service(client).await),
        None => None,
    };

    Ok(StatusReport {
        store_path: store.location().to_path_buf(),
        concepts,
        themes,
        store_locked: store.is_locked(),
        run_locked: LockMarker::is_held(run_lock_path),
        run_lock_holder: LockMarker::holder(run_lock_path),
        enrichment,
    })
}

async fn check_service(client: &dyn ChatClient) -> EnrichmentStatus {
    let model = client.model().to_string();
    match client.list_models().await {
        Ok(models) => {
            // Ollama reports "name:tag"; a bare configured name matches any tag.
            let model_installed = models
                .iter()
                .any(|m| m == &model || m.split(':').next() == Some(model.as_str()));
            EnrichmentStatus {
                model,
                available: true,
                model_installed,
            }
        }
        Err(e) => {
            debug!(error = %e, "enrichment service check failed");
            EnrichmentStatus {
                model,
                available: false,
                model_installed: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use taxwatch_shared::Concept;
    use taxwatch_storage::CsvRecordStore;

    use crate::enrichment::tests::FakeChat;

    #[tokio::test]
    async fn reports_counts_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::new(dir.path().join("conceptos_dian.csv"));
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        store
            .save(&[
                Concept::new("Concepto 1", date, "IVA", "d", "https://cijuf.org.co/concepto/1"),
                Concept::new("Concepto 2", date, "Renta", "d", "https://cijuf.org.co/concepto/2"),
                Concept::new("Concepto 3", date, "IVA", "d", "https://cijuf.org.co/concepto/3"),
            ])
            .unwrap();
        let run_lock = dir.path().join("taxwatch.lock");
        let _held = LockMarker::acquire(&run_lock).unwrap();

        let report = collect_status(&store, &run_lock, None).await.unwrap();
        assert_eq!(report.concepts, 3);
        assert_eq!(report.themes, 2);
        assert!(!report.store_locked);
        assert!(report.run_locked);
        assert!(report.run_lock_holder.unwrap().contains("pid="));
        assert!(report.enrichment.is_none());
    }

    #[tokio::test]
    async fn empty_store_with_offline_collaborator() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::new(dir.path().join("conceptos_dian.csv"));
        let chat = FakeChat::offline();

        let report = collect_status(&store, &dir.path().join("taxwatch.lock"), Some(&chat))
            .await
            .unwrap();
        assert_eq!(report.concepts, 0);
        assert!(!report.run_locked);
        let enrichment = report.enrichment.unwrap();
        assert!(!enrichment.available);
        assert!(!enrichment.model_installed);
    }

    #[tokio::test]
    async fn installed_model_matches_without_tag() {
        let chat = FakeChat::replying("ok");
        let status = check_service(&chat).await;
        assert!(status.available);
        assert!(status.model_installed);
    }
}
