mod compliance;
#[cfg(test)]
mod testing;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use sop_core::policy::UNEXPECTED_APOLOGY;
use sop_core::{
    advisory_safe_cues, classify_query, scan_for_violations, ClassificationVerdict,
    ComplianceResult, ExplainRequest, RefusalKind,
};
use sop_llm::TextGenerator;
use sop_observability::AppMetrics;
use sop_storage::SopRepository;
use tracing::{debug, error, info, instrument, warn};

pub use compliance::{ComplianceLoop, LoopSettings};

/// Runs the intent gate, resolves SOP reference text and drives the
/// compliance loop for questions the gate lets through.
pub struct ExplainerAgent<G, S>
where
    G: TextGenerator,
    S: SopRepository,
{
    compliance: ComplianceLoop<G>,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
}

impl<G, S> ExplainerAgent<G, S>
where
    G: TextGenerator,
    S: SopRepository,
{
    pub fn new(
        generator: Arc<G>,
        store: Arc<S>,
        settings: LoopSettings,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            compliance: ComplianceLoop::new(generator, settings, metrics.clone()),
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[instrument(skip(self, request), fields(sop_id = request.sop_id.as_deref().unwrap_or("")))]
    pub async fn explain(&self, request: ExplainRequest) -> ComplianceResult {
        let started = Instant::now();
        self.metrics.inc_request();

        let verdict = classify_query(&request.question);
        let result = match verdict.matched {
            Some(intent) => {
                self.metrics.inc_filtered();
                info!(
                    matched = intent.as_str(),
                    group = intent.group(),
                    "question refused at intent gate"
                );
                ComplianceResult::refused(
                    verdict
                        .refusal_text
                        .unwrap_or_else(|| RefusalKind::Generic.text().to_string()),
                )
            }
            None => {
                debug!(cues = ?advisory_safe_cues(&request.question), "question passed intent gate");
                let context = self.lookup_context(request.sop_id.as_deref()).await;
                self.produce_guarded(&request.question, context.as_deref())
                    .await
            }
        };

        self.metrics.observe_latency(started.elapsed());
        info!(
            safe = result.safe,
            filtered = result.filtered,
            rewritten = result.rewritten,
            "question handled"
        );
        result
    }

    pub fn classify(&self, question: &str) -> ClassificationVerdict {
        classify_query(question)
    }

    pub fn scan(&self, text: &str) -> Vec<String> {
        scan_for_violations(text)
    }

    async fn lookup_context(&self, sop_id: Option<&str>) -> Option<String> {
        let sop_id = sop_id.map(str::trim).filter(|id| !id.is_empty())?;

        match self.store.sop_content(sop_id).await {
            Ok(Some(content)) => Some(content),
            Ok(None) => {
                warn!(sop_id, "invalid SOP id provided, answering without reference text");
                None
            }
            Err(err) => {
                warn!(sop_id, error = %err, "SOP lookup failed, answering without reference text");
                None
            }
        }
    }

    async fn produce_guarded(&self, question: &str, context: Option<&str>) -> ComplianceResult {
        match AssertUnwindSafe(self.compliance.produce(question, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                self.metrics.inc_unexpected_error();
                error!(error = %detail, "unexpected failure while producing explanation");
                ComplianceResult::failed(UNEXPECTED_APOLOGY, detail)
            }
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
