pub mod events;
pub mod jobs;
pub mod models;
pub mod request;
pub mod runs;
