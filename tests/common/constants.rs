//! Shared constants for end-to-end tests
//!
//! When the fake analysis or timing budgets change, update only this file.

// ============================================================================
// Test Project Data
// ============================================================================

/// Owner of every project created by the tests
pub const TEST_USER_ID: &str = "user-1";

/// Audio path handed to the server; the fakes never open it
pub const TEST_AUDIO_PATH: &str = "/audio/test-track.mp3";

/// Track length reported by the fake analyzer, in seconds
pub const TEST_TRACK_DURATION: f64 = 6.0;

/// Beats reported by the fake analyzer
pub const TEST_TRACK_BEATS: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

/// Frame rate the test server renders at
pub const TEST_FPS: u32 = 10;

/// Frames a procedural render of the test track captures
#[allow(dead_code)]
pub const TEST_TRACK_FRAMES: usize = 60;

/// Beats per generated image in AI-hybrid renders (3 sections for the test track)
pub const TEST_BEATS_PER_IMAGE: usize = 2;

/// Seed of the second AI section, used to make exactly that image fail
#[allow(dead_code)]
pub const SECOND_SECTION_SEED: u64 = 137;

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Default timeout for HTTP requests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval for server readiness
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for analysis or a render to settle
pub const SETTLE_TIMEOUT_MS: u64 = 10_000;

/// Polling interval while waiting for analysis or a render
pub const SETTLE_POLL_INTERVAL_MS: u64 = 25;
