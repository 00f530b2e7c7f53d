//! Utility functions for collected artifacts.
//!
//! ## Components
//!
//! - **Compression**: the lazily created ZIP archive of collected files
//! - **Hashing**: streaming MD5, SHA-1 and SHA-256
//!
//! ### Hashing a stream of chunks
//!
//! ```
//! use artifact_collector::utils::hash::MultiHasher;
//!
//! let mut hasher = MultiHasher::new();
//! hasher.update(b"MZtest ");
//! hasher.update(b"content");
//! let hashes = hasher.finalize();
//! assert_eq!(hashes.md5, "10dbf3e392abcc57f8fae061c7c0aeec");
//! ```

/// ZIP archive creation
pub mod compress;

/// Cryptographic hash calculation utilities
pub mod hash;
