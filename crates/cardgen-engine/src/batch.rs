use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use cardgen_contracts::models::ConceptCatalog;
use cardgen_contracts::request::{GenerationRequest, ModelChoice, ParseError, QualityTier, Side};
use cardgen_contracts::runs::{BatchSummary, ErrorKind, GenerationOutcome};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::concurrency::ProviderSlots;
use crate::engine::GenerationEngine;
use crate::providers::map_object;

/// Scheduling weight: base 1, +2 production, +1 review, +1 front, plus the
/// concept's catalog weight. Higher runs first.
pub fn calculate_priority(
    concept: &str,
    side: Side,
    quality: QualityTier,
    catalog: &ConceptCatalog,
) -> i64 {
    let mut priority = 1;
    priority += match quality {
        QualityTier::Production => 2,
        QualityTier::Review => 1,
        QualityTier::Draft => 0,
    };
    if side == Side::Front {
        priority += 1;
    }
    priority + catalog.priority_weight(concept)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub request: GenerationRequest,
    pub priority: i64,
}

impl BatchItem {
    pub fn new(request: GenerationRequest, catalog: &ConceptCatalog) -> Self {
        let priority = calculate_priority(
            request.concept(),
            request.side(),
            request.quality(),
            catalog,
        );
        Self { request, priority }
    }

    /// Cross product of `concepts` and `sides`, concept-major.
    pub fn grid<S: AsRef<str>>(
        concepts: &[S],
        sides: &[Side],
        quality: QualityTier,
        model: ModelChoice,
        catalog: &ConceptCatalog,
    ) -> Result<Vec<Self>, ParseError> {
        let mut items = Vec::with_capacity(concepts.len() * sides.len());
        for concept in concepts {
            for side in sides {
                let request = GenerationRequest::new(concept.as_ref(), *side, quality, model)?;
                items.push(Self::new(request, catalog));
            }
        }
        Ok(items)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_workers: usize,
    pub max_concurrent_per_provider: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_concurrent_per_provider: 2,
        }
    }
}

/// Fans batch items across a bounded pool of worker threads.
///
/// Clones share the engine and the provider slots, so concurrent batches
/// from one processor respect the same per-provider cap.
#[derive(Clone)]
pub struct BatchProcessor {
    engine: Arc<GenerationEngine>,
    slots: ProviderSlots,
}

impl BatchProcessor {
    pub fn new(engine: Arc<GenerationEngine>) -> Self {
        Self {
            engine,
            slots: ProviderSlots::new(),
        }
    }

    pub fn with_slots(mut self, slots: ProviderSlots) -> Self {
        self.slots = slots;
        self
    }

    pub fn engine(&self) -> &Arc<GenerationEngine> {
        &self.engine
    }

    pub fn slots(&self) -> &ProviderSlots {
        &self.slots
    }

    /// Returns exactly one outcome per item, in completion order.
    /// `on_progress` runs on the calling thread after each completion.
    pub fn run_batch(
        &self,
        mut items: Vec<BatchItem>,
        options: BatchOptions,
        on_progress: &mut dyn FnMut(f64),
    ) -> BatchSummary {
        let started = Instant::now();
        let total = items.len();
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        let workers = options.max_workers.max(1).min(total.max(1));
        let cap = options.max_concurrent_per_provider.max(1);

        info!(total, workers, cap, "batch started");
        self.emit(
            "batch_started",
            json!({
                "total": total,
                "max_workers": workers,
                "max_concurrent_per_provider": cap,
            }),
        );

        let mut outcomes = Vec::with_capacity(total);
        if total > 0 {
            let queue = Mutex::new(items.into_iter().collect::<VecDeque<_>>());
            let (tx, rx) = mpsc::channel::<GenerationOutcome>();

            thread::scope(|scope| {
                let mut spawned = 0;
                for idx in 0..workers {
                    let tx = tx.clone();
                    let queue = &queue;
                    let spawn = thread::Builder::new()
                        .name(format!("cardgen-worker-{idx}"))
                        .spawn_scoped(scope, move || self.work_queue(queue, &tx, cap));
                    match spawn {
                        Ok(_) => spawned += 1,
                        Err(err) => warn!(worker = idx, error = %err, "worker spawn failed"),
                    }
                }
                if spawned == 0 {
                    warn!("no worker threads available; processing batch inline");
                    self.work_queue(&queue, &tx, cap);
                }
                drop(tx);

                for outcome in rx {
                    outcomes.push(outcome);
                    let percent = outcomes.len() as f64 / total as f64 * 100.0;
                    on_progress(percent);
                    self.emit(
                        "batch_progress",
                        json!({
                            "completed": outcomes.len(),
                            "total": total,
                            "percent": percent,
                        }),
                    );
                }
            });
        }

        let summary = BatchSummary::from_outcomes(outcomes, started.elapsed().as_secs_f64());
        info!(
            successful = summary.successful,
            failed = summary.failed,
            total_cost_usd = summary.total_cost_usd,
            "batch finished"
        );
        self.emit(
            "batch_finished",
            json!({
                "total": summary.total(),
                "successful": summary.successful,
                "failed": summary.failed,
                "total_cost_usd": summary.total_cost_usd,
                "elapsed_s": summary.elapsed_seconds,
            }),
        );
        summary
    }

    fn work_queue(
        &self,
        queue: &Mutex<VecDeque<BatchItem>>,
        tx: &mpsc::Sender<GenerationOutcome>,
        cap: usize,
    ) {
        loop {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(item) = next else {
                break;
            };
            if tx.send(self.process_item(&item, cap)).is_err() {
                break;
            }
        }
    }

    /// One item, never panics: the provider slot is held only around the
    /// engine call, and a panic becomes an `Unhandled` outcome.
    pub fn process_item(&self, item: &BatchItem, cap: usize) -> GenerationOutcome {
        let request = &item.request;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            match self.engine.select_provider(request) {
                Ok(selection) => {
                    let _slot = self.slots.acquire(selection.provider, cap);
                    self.engine.generate_with(request, &selection)
                }
                Err(_) => self.engine.generate(request),
            }
        }));
        result.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(concept = request.concept(), side = %request.side(), %message, "worker panicked");
            GenerationOutcome::failed(
                request,
                ErrorKind::Unhandled,
                format!("unexpected failure: {message}"),
            )
        })
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.engine.events().emit(event_type, map_object(payload)) {
            warn!(event_type, error = %err, "event write failed");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "panic".to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use cardgen_contracts::events::EventWriter;
    use cardgen_contracts::models::ProviderKind;
    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::providers::{
        ImageProvider, ImageProviderRegistry, ProviderGenerateRequest, ProviderGenerateResponse,
    };

    struct SolidProvider {
        kind: ProviderKind,
        image: Vec<u8>,
    }

    impl ImageProvider for SolidProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn generate(
            &self,
            _request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            Ok(ProviderGenerateResponse {
                image: self.image.clone(),
                mime_type: None,
                provider_request: Default::default(),
                provider_response: Default::default(),
                warnings: Vec::new(),
            })
        }
    }

    fn processor(root: &std::path::Path) -> anyhow::Result<BatchProcessor> {
        let mut bytes = Cursor::new(Vec::new());
        RgbImage::from_pixel(640, 640, Rgb([1, 2, 3])).write_to(&mut bytes, ImageFormat::Png)?;
        let engine = GenerationEngine::new(
            root,
            ImageProviderRegistry::new().with(SolidProvider {
                kind: ProviderKind::Gemini,
                image: bytes.into_inner(),
            }),
            EventWriter::detached("batch-test"),
        );
        Ok(BatchProcessor::new(Arc::new(engine)))
    }

    #[test]
    fn priority_follows_weights() {
        let catalog = ConceptCatalog::default();
        assert_eq!(
            calculate_priority("Clinical-Precision", Side::Front, QualityTier::Production, &catalog),
            7
        );
        assert_eq!(
            calculate_priority("Luxury-Wellness", Side::Back, QualityTier::Review, &catalog),
            3
        );
        assert_eq!(
            calculate_priority("Unknown", Side::Back, QualityTier::Draft, &catalog),
            1
        );
    }

    #[test]
    fn grid_builds_concept_major_cross_product() -> anyhow::Result<()> {
        let items = BatchItem::grid(
            &["Athletic-Edge", "Luxury-Wellness"],
            &Side::ALL,
            QualityTier::Draft,
            ModelChoice::Auto,
            &ConceptCatalog::default(),
        )?;
        let labels: Vec<(String, Side)> = items
            .iter()
            .map(|item| (item.request.concept().to_string(), item.request.side()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Athletic-Edge".to_string(), Side::Front),
                ("Athletic-Edge".to_string(), Side::Back),
                ("Luxury-Wellness".to_string(), Side::Front),
                ("Luxury-Wellness".to_string(), Side::Back),
            ]
        );
        Ok(())
    }

    #[test]
    fn grid_rejects_empty_concept() {
        let err = BatchItem::grid(
            &["  "],
            &[Side::Front],
            QualityTier::Draft,
            ModelChoice::Auto,
            &ConceptCatalog::default(),
        );
        assert_eq!(err, Err(ParseError::EmptyConcept));
    }

    #[test]
    fn single_worker_completes_in_priority_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let processor = processor(temp.path())?;
        let catalog = ConceptCatalog::default();
        let items = BatchItem::grid(
            &["Luxury-Wellness", "Clinical-Precision"],
            &[Side::Back, Side::Front],
            QualityTier::Draft,
            ModelChoice::Auto,
            &catalog,
        )?;

        let mut progress = Vec::new();
        let summary = processor.run_batch(
            items,
            BatchOptions {
                max_workers: 1,
                max_concurrent_per_provider: 1,
            },
            &mut |percent| progress.push(percent),
        );

        let order: Vec<(String, Side)> = summary
            .outcomes
            .iter()
            .map(|outcome| (outcome.concept.clone(), outcome.side))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Clinical-Precision".to_string(), Side::Front),
                ("Clinical-Precision".to_string(), Side::Back),
                ("Luxury-Wellness".to_string(), Side::Front),
                ("Luxury-Wellness".to_string(), Side::Back),
            ]
        );
        assert_eq!(progress, vec![25.0, 50.0, 75.0, 100.0]);
        Ok(())
    }

    #[test]
    fn empty_batch_reports_no_progress() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let processor = processor(temp.path())?;
        let mut calls = 0;
        let summary = processor.run_batch(Vec::new(), BatchOptions::default(), &mut |_| calls += 1);
        assert_eq!(summary.total(), 0);
        assert_eq!(calls, 0);
        Ok(())
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
