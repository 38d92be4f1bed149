#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cardgen_contracts::events::EventWriter;
use cardgen_contracts::models::ProviderKind;
use cardgen_engine::providers::{
    ImageProvider, ImageProviderRegistry, ProviderGenerateRequest, ProviderGenerateResponse,
};
use cardgen_engine::GenerationEngine;
use image::{ImageFormat, Rgb, RgbImage};

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([0, 201, 167]))
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap_or_else(|err| panic!("encode test png: {err}"));
    bytes.into_inner()
}

fn response(image: Vec<u8>) -> ProviderGenerateResponse {
    ProviderGenerateResponse {
        image,
        mime_type: Some("image/png".to_string()),
        provider_request: Default::default(),
        provider_response: Default::default(),
        warnings: Vec::new(),
    }
}

/// Always answers with the same bytes.
pub struct FixedProvider {
    pub kind: ProviderKind,
    pub image: Vec<u8>,
}

impl FixedProvider {
    pub fn card(kind: ProviderKind) -> Self {
        Self {
            kind,
            image: png(1536, 1024),
        }
    }
}

impl ImageProvider for FixedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn generate(&self, _request: &ProviderGenerateRequest) -> anyhow::Result<ProviderGenerateResponse> {
        Ok(response(self.image.clone()))
    }
}

/// Tracks simultaneous calls and holds each one open for `delay`.
pub struct CountingProvider {
    pub kind: ProviderKind,
    pub delay: Duration,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new(kind: ProviderKind, delay: Duration) -> Self {
        Self {
            kind,
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ImageProvider for CountingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn generate(&self, _request: &ProviderGenerateRequest) -> anyhow::Result<ProviderGenerateResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response(png(1024, 1024)))
    }
}

/// Panics on the `panic_on`-th call (1-based).
pub struct PanickingProvider {
    pub kind: ProviderKind,
    pub panic_on: usize,
    pub calls: AtomicUsize,
}

impl ImageProvider for PanickingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn generate(&self, _request: &ProviderGenerateRequest) -> anyhow::Result<ProviderGenerateResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.panic_on {
            panic!("provider client crashed on call {call}");
        }
        Ok(response(png(1536, 1024)))
    }
}

pub fn engine(root: &Path, registry: ImageProviderRegistry) -> GenerationEngine {
    GenerationEngine::new(root, registry, EventWriter::detached("integration"))
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}
