mod concepts;
mod registry;
mod selectors;

pub use concepts::{ConceptCatalog, ConceptSpec, DEFAULT_CONCEPT_STYLE};
pub use registry::{transport_params, ProviderKind, ProviderSpec, TransportParams};
pub use selectors::{ProviderAvailability, ProviderSelection, ProviderSelector, SelectionError};
