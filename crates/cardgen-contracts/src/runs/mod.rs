pub mod outcome;
pub mod summary;

pub use outcome::{ErrorKind, GenerationOutcome, TransportFailure};
pub use summary::{write_summary, BatchSummary};
