//! # artifact_collector
//!
//! A declarative forensic artifact collector. What to collect is described by
//! ForensicArtifacts YAML definitions; this crate loads them, selects the ones
//! that apply to the host and executes their sources.
//!
//! ## Overview
//!
//! Each definition carries sources of one of several kinds: file globs,
//! commands, registry keys and values, WMI queries, or groups of other
//! artifacts. Sources are expanded with host variables (`%%users.homedir%%`),
//! resolved against the live system and written into a per-run output
//! directory.
//!
//! ## Features
//!
//! - **Path globbing**: `*`, `?`, `[..]` and depth-bounded `**N` over any tree
//! - **Raw NTFS access**: locked files are read straight from the volume
//! - **Registry as a filesystem**: the same globs walk registry keys
//! - **File info**: hashes, MIME type and PE version data of collected files
//! - **Reputation lookups**: executables are checked in the background
//!
//! ## Usage
//!
//! ```no_run
//! use artifact_collector::artifacts::{ArtifactDefinitionsRegistry, ArtifactsReader};
//! use artifact_collector::collectors::Collector;
//! use artifact_collector::config::Selection;
//! use artifact_collector::output::Outputs;
//! use artifact_collector::variables::HostVariables;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut registry = ArtifactDefinitionsRegistry::new();
//! registry.read_from_directory(&ArtifactsReader::default(), Path::new("data"), Some("yaml"))?;
//!
//! let selection = Selection {
//!     platform: "Linux".to_string(),
//!     ..Default::default()
//! };
//! let variables = HostVariables::for_platform("Linux");
//! let mut collector = Collector::with_default_collectors("Linux", variables, None)?;
//!
//! let definitions = registry.get_definitions();
//! for (definition, source) in selection.select(&definitions) {
//!     collector.register_source(definition, source);
//! }
//!
//! let mut outputs = Outputs::new(Path::new("/tmp/collection"), 0, false)?;
//! collector.collect(&mut outputs)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`artifacts`]: Definitions, source types and the definitions registry
//! - [`variables`]: Host variables and `%%var%%` substitution
//! - [`filesystem`]: Path backends and the glob pipeline
//! - [`collectors`]: Source dispatch and the collection backends
//! - [`output`]: The run directory and everything written into it
//! - [`analysis`]: Background reputation lookups
//! - [`config`]: Settings file, size limits and artifact selection
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Settings, size parsing and artifact selection
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Logger setup
pub mod logging;

/// Artifact definitions, source types and their registry
pub mod artifacts;

/// Host variables used in artifact sources
pub mod variables;

/// Path backends and glob resolution
pub mod filesystem;

/// Collection backends and the source dispatcher
pub mod collectors;

/// Output directory of a run
pub mod output;

/// Hash reputation lookups
pub mod analysis;

/// Hashing and archive helpers
pub mod utils;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
