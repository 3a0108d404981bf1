//! Client side of the remote song synthesis API: request signing, job
//! submission and status polling.

mod client;
mod error;
pub mod models;
mod poller;
pub mod signer;

pub use client::{ApiActions, SynthesisApi, SynthesisClient};
pub use error::RemoteError;
pub use models::{
    Captions, GenerationRequest, SongResult, Task, TaskReport, TaskStatus, Utterance,
};
pub use poller::{PollPolicy, TaskPoller};
pub use signer::{Credentials, RequestSigner, SignedRequest, SigningScope};
