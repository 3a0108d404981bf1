//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{RemoteBehavior, TestClient, TestServer};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_generate() {
//!     let server = TestServer::spawn(RemoteBehavior::Succeed { pending: 1 }).await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let response = client.generate("a song about rain").await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fake_remote;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fake_remote::{test_audio_bytes, FakeRemote, RemoteBehavior};
pub use server::TestServer;
