//! Songforge Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod cache;
pub mod config;
pub mod generation;
pub mod remote;
pub mod server;

// Re-export commonly used types for convenience
pub use cache::CacheManager;
pub use generation::{GenerationJobs, GenerationService};
pub use remote::{GenerationRequest, SynthesisApi, SynthesisClient};
pub use server::{run_server, RequestsLoggingLevel};
