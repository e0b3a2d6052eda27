//! System-wide default constants.
//!
//! Grouped by subsystem. Every value here can be overridden in
//! `safescan.toml` unless noted otherwise.

// ============================================================================
// Server
// ============================================================================

pub const BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Maximum accepted request body for uploads (MiB).
pub const MAX_UPLOAD_MB: usize = 10;

// ============================================================================
// Worker Pool
// ============================================================================

/// Queue capacity as a multiple of the worker count.
pub const QUEUE_FACTOR: usize = 3;

/// Classifier attempts per job, first attempt included.
pub const MAX_RETRIES: u32 = 3;

/// Pause between classifier attempts (ms).
pub const RETRY_DELAY_MS: u64 = 1_000;

/// How long an upload waits for its classification (ms).
pub const JOB_TIMEOUT_MS: u64 = 5_000;

/// Worker count used when none is configured: one per available CPU.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

// ============================================================================
// Result Cache
// ============================================================================

/// 3 600 s = 60 minutes.
pub const CACHE_TTL_SECS: u64 = 3_600;

/// Upper bound for cache TTL and purge interval: 30 days.
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 3_600;

pub const CACHE_PURGE_INTERVAL_SECS: u64 = 60;

pub const CACHE_TIMEOUT_MS: u64 = 3_000;

// ============================================================================
// Storage
// ============================================================================

pub const DB_PATH: &str = "./data/uploads.db";

pub const STORAGE_TIMEOUT_MS: u64 = 3_000;

// ============================================================================
// Files
// ============================================================================

pub const UPLOAD_DIR: &str = "./data/uploads";

pub const TEMP_UPLOAD_DIR: &str = "./data/tmp";

/// URL prefix under which classified files are served.
pub const PUBLIC_PREFIX: &str = "/static/uploads";

// ============================================================================
// Notification Hub
// ============================================================================

/// Per-subscriber outbound buffer (messages).
pub const HUB_CLIENT_BUFFER: usize = 256;

pub const HUB_COMMAND_BUFFER: usize = 1_024;

// ============================================================================
// Pagination
// ============================================================================

/// Upper bound on `limit` for admin listing (not configurable).
pub const MAX_PAGE_SIZE: usize = 500;
