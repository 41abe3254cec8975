//! AI enrichment of new concepts.
//!
//! The gateway never fails: an unreachable collaborator or a failed call
//! yields a fixed placeholder text, so one bad concept cannot abort a batch.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use taxwatch_shared::Concept;
use taxwatch_shared::text::truncate_chars;

use crate::ollama::{ChatClient, ChatOptions};

/// Fixed texts stored in place of generated output.
pub mod placeholders {
    pub const NO_CONTENT: &str = "No hay contenido para resumir.";
    pub const SUMMARY_NOT_CONFIGURED: &str = "Resumen no disponible: Ollama no configurado.";
    pub const SUMMARY_ERROR: &str = "Resumen no disponible por error en Ollama.";
    pub const ANALYSIS_UNAVAILABLE: &str = "Análisis no disponible.";
    pub const ANALYSIS_NOT_CONFIGURED: &str = "Análisis no disponible: Ollama no configurado.";
    pub const ANALYSIS_ERROR: &str = "Análisis no disponible por error en Ollama.";

    /// Whether `text` is one of the summary placeholders.
    pub fn is_summary_placeholder(text: &str) -> bool {
        [NO_CONTENT, SUMMARY_NOT_CONFIGURED, SUMMARY_ERROR].contains(&text)
    }
}

const SUMMARY_OPTIONS: ChatOptions = ChatOptions {
    temperature: 0.3,
    top_p: 0.9,
    max_tokens: 500,
};

const ANALYSIS_OPTIONS: ChatOptions = ChatOptions {
    temperature: 0.4,
    top_p: 0.9,
    max_tokens: 800,
};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Per-concept progress callback.
pub trait EnrichmentProgress: Send + Sync {
    fn concept_started(&self, current: usize, total: usize, title: &str);
}

/// No-op enrichment progress.
pub struct SilentEnrichmentProgress;

impl EnrichmentProgress for SilentEnrichmentProgress {
    fn concept_started(&self, _current: usize, _total: usize, _title: &str) {}
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Summary and analysis generation over a [`ChatClient`].
pub struct EnrichmentGateway {
    client: Arc<dyn ChatClient>,
    max_text_chars: usize,
    available: bool,
}

impl EnrichmentGateway {
    /// Ask the collaborator once and remember the answer.
    pub async fn connect(client: Arc<dyn ChatClient>, max_text_chars: usize) -> Self {
        let available = match client.check_available().await {
            Ok(()) => true,
            Err(e) => {
                warn!(model = client.model(), error = %e, "enrichment collaborator unavailable");
                false
            }
        };

        Self {
            client,
            max_text_chars,
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Short summary of the concept's full text.
    pub async fn summarize(&self, concept: &Concept) -> String {
        if concept.full_text.trim().is_empty() {
            return placeholders::NO_CONTENT.into();
        }
        if !self.available {
            return placeholders::SUMMARY_NOT_CONFIGURED.into();
        }

        let prompt = summary_prompt(concept, self.max_text_chars);
        match self.client.chat(&prompt, SUMMARY_OPTIONS).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(link = %concept.link, "empty summary returned");
                placeholders::SUMMARY_ERROR.into()
            }
            Err(e) => {
                warn!(link = %concept.link, error = %e, "summary generation failed");
                placeholders::SUMMARY_ERROR.into()
            }
        }
    }

    /// Advisory analysis built from the concept metadata and its summary.
    ///
    /// A blank or placeholder summary is not sent to the model.
    pub async fn analyze(&self, concept: &Concept, summary: &str) -> String {
        let summary = summary.trim();
        if summary.is_empty() || placeholders::is_summary_placeholder(summary) {
            return placeholders::ANALYSIS_UNAVAILABLE.into();
        }
        if !self.available {
            return placeholders::ANALYSIS_NOT_CONFIGURED.into();
        }

        let prompt = analysis_prompt(concept, truncate_chars(summary, self.max_text_chars));
        match self.client.chat(&prompt, ANALYSIS_OPTIONS).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(link = %concept.link, "empty analysis returned");
                placeholders::ANALYSIS_ERROR.into()
            }
            Err(e) => {
                warn!(link = %concept.link, error = %e, "analysis generation failed");
                placeholders::ANALYSIS_ERROR.into()
            }
        }
    }

    /// Attach summary then analysis to each concept, sequentially.
    ///
    /// Returns the input untouched when the collaborator was unavailable at
    /// connect time.
    #[instrument(skip_all, fields(concepts = concepts.len(), model = self.client.model()))]
    pub async fn process_batch(
        &self,
        mut concepts: Vec<Concept>,
        progress: &dyn EnrichmentProgress,
    ) -> Vec<Concept> {
        if concepts.is_empty() {
            return concepts;
        }
        if !self.available {
            warn!("skipping enrichment, collaborator unavailable");
            return concepts;
        }

        let total = concepts.len();
        for (i, concept) in concepts.iter_mut().enumerate() {
            progress.concept_started(i + 1, total, &concept.title);

            let summary = self.summarize(concept).await;
            let analysis = self.analyze(concept, &summary).await;
            concept.summary = Some(summary);
            concept.analysis = Some(analysis);
        }

        info!(total, "enrichment completed");
        concepts
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn summary_prompt(concept: &Concept, max_text_chars: usize) -> String {
    let text = truncate_chars(&concept.full_text, max_text_chars);
    format!(
        "Eres un abogado tributarista experto. Resume el siguiente concepto de la DIAN \
         en un máximo de 6 frases, destacando implicaciones prácticas para los \
         contribuyentes, cambios normativos relevantes, obligaciones y recomendaciones.\n\n\
         Título: {title}\n\
         Tema: {theme}\n\
         Descriptor: {descriptor}\n\n\
         Texto completo:\n{text}\n\n\
         Resumen:",
        title = concept.title,
        theme = concept.theme,
        descriptor = concept.descriptor,
    )
}

fn analysis_prompt(concept: &Concept, summary: &str) -> String {
    format!(
        "Actúa como consultor tributario sénior. Con base en el resumen y los datos del \
         concepto, entrega un análisis con estas secciones:\n\
         1. RIESGOS IDENTIFICADOS\n\
         2. OPORTUNIDADES\n\
         3. ACCIONES SUGERIDAS\n\
         4. NORMAS RELACIONADAS\n\
         5. IMPACTO EMPRESARIAL\n\n\
         Título: {title}\n\
         Tema: {theme}\n\
         Descriptor: {descriptor}\n\
         Fecha: {date}\n\n\
         Resumen:\n{summary}\n\n\
         Análisis:",
        title = concept.title,
        theme = concept.theme,
        descriptor = concept.descriptor,
        date = concept.date.format("%Y-%m-%d"),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use taxwatch_shared::{Result, TaxwatchError};

    /// Scripted chat client: records prompts, answers from a fixed reply.
    pub(crate) struct FakeChat {
        pub available: bool,
        pub reply: Option<String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl FakeChat {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                available: true,
                reply: Some(reply.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn offline() -> Self {
            Self {
                available: false,
                reply: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatClient for FakeChat {
        fn model(&self) -> &str {
            "fake"
        }

        async fn chat(&self, prompt: &str, _options: ChatOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .ok_or_else(|| TaxwatchError::EnrichmentUnavailable("scripted failure".into()))
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            if self.available {
                Ok(vec!["fake".into()])
            } else {
                Err(TaxwatchError::EnrichmentUnavailable("offline".into()))
            }
        }
    }

    fn concept(full_text: &str) -> Concept {
        Concept::new(
            "Concepto DIAN 100 de 2025",
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            "IVA",
            "Exclusión",
            "https://cijuf.org.co/concepto/100-2025",
        )
        .with_full_text(full_text)
    }

    #[tokio::test]
    async fn unavailable_collaborator_returns_input_unchanged() {
        let chat = Arc::new(FakeChat::offline());
        let gateway = EnrichmentGateway::connect(chat.clone(), 12_000).await;
        assert!(!gateway.is_available());

        let input = vec![concept("texto"), concept("")];
        let output = gateway
            .process_batch(input.clone(), &SilentEnrichmentProgress)
            .await;
        assert_eq!(output, input);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn batch_attaches_summary_and_analysis() {
        let chat = Arc::new(FakeChat::replying("Generado"));
        let gateway = EnrichmentGateway::connect(chat.clone(), 12_000).await;

        let output = gateway
            .process_batch(vec![concept("texto del concepto")], &SilentEnrichmentProgress)
            .await;
        assert_eq!(output[0].summary.as_deref(), Some("Generado"));
        assert_eq!(output[0].analysis.as_deref(), Some("Generado"));
        assert_eq!(chat.calls(), 2);
    }

    #[tokio::test]
    async fn chat_failure_degrades_to_placeholders() {
        let chat = Arc::new(FakeChat {
            available: true,
            reply: None,
            prompts: Mutex::new(Vec::new()),
        });
        let gateway = EnrichmentGateway::connect(chat.clone(), 12_000).await;

        let output = gateway
            .process_batch(vec![concept("texto")], &SilentEnrichmentProgress)
            .await;
        assert_eq!(output[0].summary.as_deref(), Some(placeholders::SUMMARY_ERROR));
        assert_eq!(output[0].analysis.as_deref(), Some(placeholders::ANALYSIS_UNAVAILABLE));
        // The failed summary is not forwarded for analysis.
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn empty_full_text_is_not_sent() {
        let chat = Arc::new(FakeChat::replying("Generado"));
        let gateway = EnrichmentGateway::connect(chat.clone(), 12_000).await;

        assert_eq!(gateway.summarize(&concept("")).await, placeholders::NO_CONTENT);
        assert_eq!(gateway.analyze(&concept(""), "  ").await, placeholders::ANALYSIS_UNAVAILABLE);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_placeholders_differ_from_error_placeholders() {
        let gateway = EnrichmentGateway::connect(Arc::new(FakeChat::offline()), 12_000).await;
        assert_eq!(
            gateway.summarize(&concept("texto")).await,
            placeholders::SUMMARY_NOT_CONFIGURED
        );
        assert_eq!(
            gateway.analyze(&concept("texto"), "Resumen real").await,
            placeholders::ANALYSIS_NOT_CONFIGURED
        );
    }

    #[tokio::test]
    async fn prompt_input_is_truncated() {
        let chat = Arc::new(FakeChat::replying("ok"));
        let gateway = EnrichmentGateway::connect(chat.clone(), 10).await;

        gateway.summarize(&concept(&"á".repeat(50))).await;
        let prompts = chat.prompts.lock().unwrap();
        assert!(prompts[0].contains(&"á".repeat(10)));
        assert!(!prompts[0].contains(&"á".repeat(11)));
    }
}
