//! Dual-provider business-card generation: provider selection, prompt
//! building, validation, persistence, batch orchestration and job tracking.

pub mod batch;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod pricing;
pub mod prompt;
pub mod providers;
pub mod validate;

pub use batch::{calculate_priority, BatchItem, BatchOptions, BatchProcessor};
pub use concurrency::{ProviderSlots, WorkQueue};
pub use config::EngineConfig;
pub use engine::GenerationEngine;
pub use error::GenerationError;
pub use jobs::JobManager;
pub use pricing::CostTable;
pub use prompt::{BrandProfile, PromptBuilder};
pub use providers::{ImageProvider, ImageProviderRegistry};
pub use validate::{validate_image, ValidationError, ValidationRules};
