use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cardgen_contracts::events::EventWriter;
use cardgen_contracts::models::{
    transport_params, ConceptCatalog, ProviderAvailability, ProviderKind, ProviderSelection,
    ProviderSelector,
};
use cardgen_contracts::request::GenerationRequest;
use cardgen_contracts::runs::GenerationOutcome;
use chrono::{DateTime, Local, TimeDelta};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::error::GenerationError;
use crate::pricing::CostTable;
use crate::prompt::{BrandProfile, PromptBuilder};
use crate::providers::{
    map_object, DryrunProvider, GeminiProvider, ImageProviderRegistry, OpenAiProvider,
    ProviderGenerateRequest,
};
use crate::validate::{assess_print_readiness, validate_image, ImageInfo, ValidationRules};

const MAX_NAME_ATTEMPTS: usize = 60;

/// Runs one request end to end: select, prompt, call, validate, persist.
///
/// Provider availability is fixed when the engine is built and equals the set
/// of registered providers. The engine never returns an error to its caller;
/// every failure is folded into a [`GenerationOutcome`].
pub struct GenerationEngine {
    selector: ProviderSelector,
    providers: ImageProviderRegistry,
    pricing: CostTable,
    prompts: PromptBuilder,
    validation: ValidationRules,
    output_root: PathBuf,
    reference_images: Vec<Vec<u8>>,
    request_timeout: Duration,
    events: EventWriter,
}

struct Artifact {
    image: Vec<u8>,
    path: PathBuf,
    info: ImageInfo,
    prompt: String,
}

struct StepFailure {
    error: GenerationError,
    provider_invoked: bool,
}

impl From<GenerationError> for StepFailure {
    fn from(error: GenerationError) -> Self {
        Self {
            error,
            provider_invoked: true,
        }
    }
}

impl GenerationEngine {
    pub fn new(
        output_root: impl Into<PathBuf>,
        providers: ImageProviderRegistry,
        events: EventWriter,
    ) -> Self {
        let availability = ProviderAvailability::new(
            providers.contains(ProviderKind::OpenAi),
            providers.contains(ProviderKind::Gemini),
        );
        Self {
            selector: ProviderSelector::new(availability),
            providers,
            pricing: CostTable::default(),
            prompts: PromptBuilder::default(),
            validation: ValidationRules::default(),
            output_root: output_root.into(),
            reference_images: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            events,
        }
    }

    /// Registers a real adapter for every provider whose key passes the
    /// format check, or the offline renderer for both in dryrun mode.
    pub fn from_config(config: &EngineConfig, events: EventWriter) -> Self {
        let availability = config.availability();
        let mut registry = ImageProviderRegistry::new();
        for kind in ProviderKind::ALL {
            if !availability.is_available(kind) {
                continue;
            }
            if config.dryrun {
                registry.register(DryrunProvider::new(kind));
                continue;
            }
            match (kind, &config.openai_api_key, &config.gemini_api_key) {
                (ProviderKind::OpenAi, Some(key), _) => {
                    registry.register(OpenAiProvider::new(key.clone(), config.openai_api_base.clone()))
                }
                (ProviderKind::Gemini, _, Some(key)) => {
                    registry.register(GeminiProvider::new(key.clone(), config.gemini_api_base.clone()))
                }
                _ => {}
            }
        }

        let mut brand = BrandProfile::default();
        if let Some(prefix) = config.file_prefix.as_ref() {
            brand.file_prefix = prefix.clone();
        }

        Self::new(config.output_root.clone(), registry, events)
            .with_pricing(CostTable::load(config.pricing_override_path.as_deref()))
            .with_brand(brand)
            .with_timeout(config.request_timeout)
    }

    pub fn with_pricing(mut self, pricing: CostTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_validation(mut self, validation: ValidationRules) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_brand(mut self, brand: BrandProfile) -> Self {
        self.prompts = PromptBuilder::new(brand, self.prompts.concepts().clone());
        self
    }

    pub fn with_concepts(mut self, concepts: ConceptCatalog) -> Self {
        self.prompts = PromptBuilder::new(self.prompts.brand().clone(), concepts);
        self
    }

    pub fn with_reference_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.reference_images = images;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn availability(&self) -> ProviderAvailability {
        self.selector.availability()
    }

    pub fn pricing(&self) -> &CostTable {
        &self.pricing
    }

    pub fn concepts(&self) -> &ConceptCatalog {
        self.prompts.concepts()
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Pure function of the request's model and quality plus the fixed
    /// availability flags.
    pub fn select_provider(
        &self,
        request: &GenerationRequest,
    ) -> Result<ProviderSelection, GenerationError> {
        Ok(self.selector.select(request.model(), request.quality())?)
    }

    pub fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        match self.select_provider(request) {
            Ok(selection) => self.generate_with(request, &selection),
            Err(err) => {
                warn!(concept = request.concept(), side = %request.side(), error = %err, "generation skipped");
                self.emit(
                    "generation_failed",
                    json!({
                        "concept": request.concept(),
                        "side": request.side(),
                        "quality": request.quality(),
                        "error_kind": err.kind(),
                        "error": err.to_string(),
                    }),
                );
                GenerationOutcome::failed(request, err.kind(), err.to_string())
            }
        }
    }

    /// Runs steps 2-5 against an already chosen provider. The batch
    /// orchestrator selects first so it can take a provider slot before
    /// calling this.
    pub fn generate_with(
        &self,
        request: &GenerationRequest,
        selection: &ProviderSelection,
    ) -> GenerationOutcome {
        let provider = selection.provider;
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!(%provider, reason, "provider fallback");
        }
        self.emit(
            "provider_selected",
            json!({
                "concept": request.concept(),
                "side": request.side(),
                "quality": request.quality(),
                "requested": request.model(),
                "provider": provider,
                "model": provider.model(),
                "fallback_reason": selection.fallback_reason,
            }),
        );

        let started = Instant::now();
        let result = self.run_steps(request, provider);
        let elapsed = started.elapsed().as_secs_f64();
        let cost = self.pricing.estimate(provider, request.quality());

        match result {
            Ok(artifact) => {
                self.emit_cost_latency(provider, cost, elapsed);
                info!(
                    %provider,
                    path = %artifact.path.display(),
                    seconds = elapsed,
                    "card generated"
                );
                let readiness = assess_print_readiness(&artifact.info);
                self.emit(
                    "artifact_created",
                    json!({
                        "concept": request.concept(),
                        "side": request.side(),
                        "quality": request.quality(),
                        "provider": provider,
                        "image_path": artifact.path.to_string_lossy(),
                        "width": artifact.info.width,
                        "height": artifact.info.height,
                        "mode": artifact.info.mode,
                        "bytes": artifact.info.byte_len,
                        "prompt_sha256": prompt_digest(&artifact.prompt),
                        "print_readiness": readiness,
                    }),
                );
                GenerationOutcome::succeeded(
                    request,
                    provider,
                    artifact.image,
                    artifact.path,
                    cost,
                    elapsed,
                    selection.fallback_reason.clone(),
                )
            }
            Err(StepFailure {
                error,
                provider_invoked,
            }) => {
                warn!(%provider, error = %error, "generation failed");
                let mut outcome = GenerationOutcome::failed(request, error.kind(), error.to_string())
                    .with_fallback_reason(selection.fallback_reason.clone())
                    .with_processing_time(elapsed);
                if provider_invoked {
                    self.emit_cost_latency(provider, cost, elapsed);
                    outcome = outcome.with_provider(provider, cost);
                }
                if let Some(failure) = error.transport_failure() {
                    outcome = outcome.with_transport_failure(failure);
                }
                self.emit(
                    "generation_failed",
                    json!({
                        "concept": request.concept(),
                        "side": request.side(),
                        "quality": request.quality(),
                        "provider": provider,
                        "error_kind": error.kind(),
                        "transport_failure": error.transport_failure(),
                        "error": error.to_string(),
                    }),
                );
                outcome
            }
        }
    }

    fn run_steps(
        &self,
        request: &GenerationRequest,
        provider: ProviderKind,
    ) -> Result<Artifact, StepFailure> {
        let Some(adapter) = self.providers.get(provider) else {
            return Err(StepFailure {
                error: GenerationError::NoProviderAvailable,
                provider_invoked: false,
            });
        };

        let prompt = self.prompts.build(request.concept(), request.side());
        let call = ProviderGenerateRequest {
            prompt: prompt.clone(),
            model: provider.model().to_string(),
            params: transport_params(provider, request.quality()),
            reference_images: self.reference_images.clone(),
            timeout: self.request_timeout,
        };
        debug!(%provider, size = %call.params.size, quality = %call.params.quality, "calling provider");
        let response = adapter
            .generate(&call)
            .map_err(|err| GenerationError::from_provider(provider, err))?;
        for warning in &response.warnings {
            debug!(%provider, warning, "provider warning");
        }

        let info = validate_image(&response.image, &self.validation)
            .map_err(|source| GenerationError::InvalidImage { provider, source })?;
        let path = self.persist(request, provider, &response.image)?;

        Ok(Artifact {
            image: response.image,
            path,
            info,
            prompt,
        })
    }

    /// Writes the image under a fresh timestamped name. An existing file is
    /// never replaced; a name clash moves the timestamp forward a second.
    fn persist(
        &self,
        request: &GenerationRequest,
        provider: ProviderKind,
        bytes: &[u8],
    ) -> Result<PathBuf, GenerationError> {
        let dir = self.output_root.join(request.quality().output_dir_name());
        fs::create_dir_all(&dir).map_err(|source| GenerationError::PersistenceFailed {
            path: dir.clone(),
            source,
        })?;

        let mut stamp = Local::now();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(self.file_name(request, provider, &stamp));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(source) = file.write_all(bytes).and_then(|()| file.sync_all()) {
                        drop(file);
                        let _ = fs::remove_file(&path);
                        return Err(GenerationError::PersistenceFailed { path, source });
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    stamp += TimeDelta::seconds(1);
                }
                Err(source) => return Err(GenerationError::PersistenceFailed { path, source }),
            }
        }

        Err(GenerationError::PersistenceFailed {
            path: dir,
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free output file name"),
        })
    }

    fn file_name(
        &self,
        request: &GenerationRequest,
        provider: ProviderKind,
        stamp: &DateTime<Local>,
    ) -> String {
        format!(
            "{}_{}_{}_{}_{}.png",
            self.prompts.brand().file_prefix,
            request.concept(),
            request.side(),
            provider.short_name(),
            stamp.format("%Y%m%d_%H%M%S")
        )
    }

    fn emit_cost_latency(&self, provider: ProviderKind, cost: f64, seconds: f64) {
        self.emit(
            "cost_latency_update",
            json!({
                "provider": provider,
                "model": provider.model(),
                "cost_total_usd": cost,
                "latency_s": seconds,
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.events.emit(event_type, map_object(payload)) {
            warn!(event_type, error = %err, "event write failed");
        }
    }
}

fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use cardgen_contracts::request::{ModelChoice, QualityTier, Side};
    use cardgen_contracts::runs::{ErrorKind, TransportFailure};
    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::providers::{
        ImageProvider, ProviderGenerateResponse, ProviderHttpError,
    };

    struct StaticProvider {
        kind: ProviderKind,
        image: Vec<u8>,
    }

    impl ImageProvider for StaticProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn generate(
            &self,
            _request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            Ok(ProviderGenerateResponse {
                image: self.image.clone(),
                mime_type: Some("image/png".to_string()),
                provider_request: Default::default(),
                provider_response: Default::default(),
                warnings: Vec::new(),
            })
        }
    }

    struct FailingProvider {
        kind: ProviderKind,
        status: u16,
    }

    impl ImageProvider for FailingProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn generate(
            &self,
            _request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            Err(anyhow::Error::new(ProviderHttpError {
                provider: self.kind.name().to_string(),
                status: self.status,
                body: "denied".to_string(),
            })
            .context(anyhow!("{} request failed", self.kind)))
        }
    }

    /// Keeps every request it receives.
    struct RecordingProvider {
        image: Vec<u8>,
        seen: Arc<Mutex<Vec<ProviderGenerateRequest>>>,
    }

    impl ImageProvider for RecordingProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        fn generate(
            &self,
            request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            self.seen
                .lock()
                .map_err(|_| anyhow!("recording lock poisoned"))?
                .push(request.clone());
            Ok(ProviderGenerateResponse {
                image: self.image.clone(),
                mime_type: None,
                provider_request: Default::default(),
                provider_response: Default::default(),
                warnings: Vec::new(),
            })
        }
    }

    fn png(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Cursor::new(Vec::new());
        RgbImage::from_pixel(width, height, Rgb([0, 201, 167]))
            .write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }

    fn request(quality: QualityTier, model: ModelChoice) -> anyhow::Result<GenerationRequest> {
        Ok(GenerationRequest::new(
            "Clinical-Precision",
            Side::Front,
            quality,
            model,
        )?)
    }

    #[test]
    fn successful_generation_persists_named_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let engine = GenerationEngine::new(
            temp.path().join("output"),
            ImageProviderRegistry::new().with(StaticProvider {
                kind: ProviderKind::Gemini,
                image: png(1536, 1024)?,
            }),
            EventWriter::new(&events_path, "session-1"),
        );

        let outcome = engine.generate(&request(QualityTier::Review, ModelChoice::Auto)?);
        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(outcome.provider_used, Some(ProviderKind::Gemini));
        assert_eq!(outcome.cost_estimate, 0.005);

        let path = outcome.output_path.ok_or_else(|| anyhow!("missing path"))?;
        assert_eq!(path.parent(), Some(temp.path().join("output").join("drafts").as_path()));
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("ASL_Alex_Shafiro_Clinical-Precision_front_GEMINI_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "ASL_Alex_Shafiro_Clinical-Precision_front_GEMINI_".len() + 19);
        assert_eq!(fs::read(&path)?, outcome.image_bytes.unwrap_or_default());

        let events = fs::read_to_string(&events_path)?;
        let types: Vec<String> = events
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec!["provider_selected", "cost_latency_update", "artifact_created"]
        );
        Ok(())
    }

    #[test]
    fn provider_call_carries_configured_timeout_and_tier_params() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = RecordingProvider {
            image: png(1536, 1024)?,
            seen: Arc::clone(&seen),
        };
        let engine = GenerationEngine::new(
            temp.path(),
            ImageProviderRegistry::new().with(provider),
            EventWriter::detached("session-1"),
        )
        .with_timeout(Duration::from_secs(17));

        let outcome = engine.generate(&request(QualityTier::Production, ModelChoice::Auto)?);
        assert!(outcome.success, "{:?}", outcome.error_message);

        let seen = seen
            .lock()
            .map_err(|_| anyhow!("recording lock poisoned"))?;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].timeout, Duration::from_secs(17));
        assert_eq!(seen[0].params.size, "1536x1024");
        assert_eq!(seen[0].params.quality, "high");
        assert!(seen[0]
            .prompt
            .contains(engine.concepts().style_for("Clinical-Precision")));
        Ok(())
    }

    #[test]
    fn default_timeout_reaches_provider() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = RecordingProvider {
            image: png(1536, 1024)?,
            seen: Arc::clone(&seen),
        };
        let engine = GenerationEngine::new(
            temp.path(),
            ImageProviderRegistry::new().with(provider),
            EventWriter::detached("session-1"),
        );
        engine.generate(&request(QualityTier::Draft, ModelChoice::Auto)?);
        let seen = seen
            .lock()
            .map_err(|_| anyhow!("recording lock poisoned"))?;
        assert_eq!(seen.first().map(|req| req.timeout), Some(DEFAULT_REQUEST_TIMEOUT));
        Ok(())
    }

    #[test]
    fn same_second_collisions_never_overwrite() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = GenerationEngine::new(
            temp.path(),
            ImageProviderRegistry::new().with(StaticProvider {
                kind: ProviderKind::OpenAi,
                image: png(1024, 1024)?,
            }),
            EventWriter::detached("session-1"),
        );
        let request = request(QualityTier::Production, ModelChoice::Auto)?;

        let first = engine.generate(&request);
        let second = engine.generate(&request);
        assert!(first.success && second.success);
        assert_ne!(first.output_path, second.output_path);
        assert_eq!(fs::read_dir(temp.path().join("production"))?.count(), 2);
        Ok(())
    }

    #[test]
    fn auth_failure_is_transport_error_without_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = GenerationEngine::new(
            temp.path(),
            ImageProviderRegistry::new().with(FailingProvider {
                kind: ProviderKind::OpenAi,
                status: 401,
            }),
            EventWriter::detached("session-1"),
        );
        let outcome = engine.generate(&request(
            QualityTier::Draft,
            ModelChoice::Provider(ProviderKind::OpenAi),
        )?);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Transport));
        assert_eq!(outcome.transport_failure, Some(TransportFailure::Authentication));
        assert_eq!(outcome.provider_used, Some(ProviderKind::OpenAi));
        assert!(outcome.image_bytes.is_none());
        assert!(!temp.path().join("drafts").exists());
        Ok(())
    }

    #[test]
    fn no_registered_provider_fails_cleanly() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = GenerationEngine::new(
            temp.path(),
            ImageProviderRegistry::new(),
            EventWriter::detached("session-1"),
        );
        let outcome = engine.generate(&request(QualityTier::Production, ModelChoice::Auto)?);
        assert_eq!(outcome.error_kind, Some(ErrorKind::NoProviderAvailable));
        assert_eq!(outcome.cost_estimate, 0.0);
        assert!(outcome.provider_used.is_none());
        Ok(())
    }

    #[test]
    fn unwritable_output_root_is_persistence_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"file")?;
        let engine = GenerationEngine::new(
            &blocker,
            ImageProviderRegistry::new().with(StaticProvider {
                kind: ProviderKind::Gemini,
                image: png(1536, 1024)?,
            }),
            EventWriter::detached("session-1"),
        );
        let outcome = engine.generate(&request(QualityTier::Draft, ModelChoice::Auto)?);
        assert_eq!(outcome.error_kind, Some(ErrorKind::PersistenceFailed));
        assert!(outcome.output_path.is_none());
        Ok(())
    }

    #[test]
    fn explicit_unavailable_provider_records_fallback() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = GenerationEngine::new(
            temp.path(),
            ImageProviderRegistry::new().with(StaticProvider {
                kind: ProviderKind::Gemini,
                image: png(1536, 1024)?,
            }),
            EventWriter::detached("session-1"),
        );
        let outcome = engine.generate(&request(
            QualityTier::Production,
            ModelChoice::Provider(ProviderKind::OpenAi),
        )?);
        assert!(outcome.success);
        assert_eq!(outcome.provider_used, Some(ProviderKind::Gemini));
        assert!(outcome.fallback_reason.is_some());
        Ok(())
    }

    #[test]
    fn dryrun_config_registers_both_providers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = EngineConfig {
            output_root: temp.path().to_path_buf(),
            file_prefix: Some("TEST".to_string()),
            dryrun: true,
            ..EngineConfig::default()
        };
        let engine = GenerationEngine::from_config(&config, EventWriter::detached("session-1"));
        assert_eq!(engine.availability(), ProviderAvailability::new(true, true));

        let outcome = engine.generate(&request(QualityTier::Production, ModelChoice::Auto)?);
        assert!(outcome.success, "{:?}", outcome.error_message);
        let name = outcome
            .output_path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("TEST_Clinical-Precision_front_GPT1_"));
        Ok(())
    }
}
