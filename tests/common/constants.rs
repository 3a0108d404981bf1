//! Shared constants for end-to-end tests
//!
//! When the fake remote API or its fixtures change, update only this file.

// ============================================================================
// Fake Remote API
// ============================================================================

/// Access key the test server signs with
pub const TEST_ACCESS_KEY: &str = "test-access-key";

/// Secret key the test server signs with
pub const TEST_SECRET_KEY: &str = "test-secret-key";

/// Task id handed out by the fake remote API
pub const TEST_TASK_ID: &str = "task-e2e-1";

/// Path of the generated song on the fake remote API
pub const TEST_AUDIO_PATH: &str = "/audio/song.mp3";

/// Size of the generated song (bytes)
pub const TEST_AUDIO_SIZE_BYTES: usize = 32_768;

/// Text of the single caption line of the generated song
pub const TEST_CAPTION_TEXT: &str = "rain on the window";

/// Duration reported for the generated song (seconds)
pub const TEST_SONG_DURATION: f64 = 42.5;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Interval between two status queries of the generation pipeline (milliseconds)
pub const TASK_POLL_INTERVAL_MS: u64 = 10;
