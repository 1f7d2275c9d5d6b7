//! Shared constants for end-to-end tests
//!
//! When test users or timings change, update only this file.

// ============================================================================
// Test Users
// ============================================================================

/// First test user
pub const USER_1_ID: &str = "user-1";
pub const USER_1_EMAIL: &str = "alice@example.com";
pub const USER_1_TOKEN: &str = "token-user-1";

/// Second test user
pub const USER_2_ID: &str = "user-2";
pub const USER_2_EMAIL: &str = "bob@example.com";
pub const USER_2_TOKEN: &str = "token-user-2";

/// Password accepted for every test user
pub const TEST_PASS: &str = "testpass123";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the backend to accept connections
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Upper bound on any awaited condition in a test
pub const WAIT_TIMEOUT_MS: u64 = 5000;

/// Reconnect delay used by test clients
pub const TEST_RECONNECT_DELAY_MS: u64 = 100;
