//! Global constants for the artifact collector.
//!
//! This module centralizes hardcoded values so that limits and well-known
//! names live in a single place.

// Buffer and chunk sizes
/// Chunk size used when streaming files from a filesystem backend (5MB)
pub const READ_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Largest PE image buffered in memory for metadata extraction (50MB)
pub const MAX_PE_SIZE: u64 = 50 * 1024 * 1024;

/// Leading bytes inspected when deciding whether content is text
pub const MIME_SNIFF_LENGTH: usize = 512;

/// Sector size used when reading raw NTFS volumes
pub const NTFS_SECTOR_SIZE: usize = 4096;

// Path resolution
/// Recursion depth applied to a bare `**` on file backends
pub const DEFAULT_RECURSION_DEPTH: i32 = 3;

/// Upper bound on substitution passes before giving up on a cyclic variable
pub const MAX_SUBSTITUTION_PASSES: usize = 32;

// Analysis queue
/// Capacity of the analysis channel
pub const ANALYSIS_BUFFER_SIZE: usize = 100;

/// Number of analysis worker threads
pub const ANALYSIS_WORKERS: usize = 5;

/// Maximum lookup attempts when the reputation service times out
pub const MAX_LOOKUP_RETRIES: u32 = 3;

/// Base delay between lookup retries in milliseconds
pub const LOOKUP_RETRY_DELAY_MS: u64 = 1000;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Hash lookup endpoint of the reputation service
pub const OPENTIP_URL: &str = "https://opentip.kaspersky.com/api/v1/search/hash";

// Output layout
/// Environment variable exported with the output directory of the current run
pub const OUTPUT_DIR_ENV: &str = "FAOUTPUTDIR";

/// Timestamp format of the per-run output directory
pub const OUTPUT_DIR_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Default settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "artifacts.yaml";

/// Directory next to the executable holding bundled definitions
pub const DEFINITIONS_DIR: &str = "data";

/// MIME types treated as Windows executables
pub const PE_MIME_TYPES: &[&str] = &[
    "application/x-msdownload",
    "application/vnd.microsoft.portable-executable",
];

/// File extensions always forwarded to analysis
pub const ANALYSIS_EXTENSIONS: &[&str] = &[".exe", ".dll", ".sys", ".bin", ".sh"];
