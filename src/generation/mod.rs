mod error;
mod jobs;
mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::GenerationError;
pub use jobs::{GenerationJobs, JobError, JobPhase, JobSnapshot};
pub use service::{GenerationOutcome, GenerationService};
