//! Artifact definitions and everything needed to load them.
//!
//! ## Components
//!
//! - **Source types**: validated, typed forms of each source kind and the factory
//!   that builds them from raw attributes
//! - **Definitions**: named recipes with their sources and OS restrictions
//! - **Registry**: case-insensitive name/alias index with group dependency tracking
//! - **Reader**: schema validation for YAML and JSON definition files
//!
//! ## Example
//!
//! ```no_run
//! use artifact_collector::artifacts::{ArtifactDefinitionsRegistry, ArtifactsReader};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let reader = ArtifactsReader::default();
//! let mut registry = ArtifactDefinitionsRegistry::new();
//! registry.read_from_directory(&reader, Path::new("data"), Some("yaml"))?;
//!
//! for name in registry.get_undefined_artifacts() {
//!     println!("Group member without definition: {}", name);
//! }
//! # Ok(())
//! # }
//! ```

mod definition;
mod errors;
mod reader;
mod registry;
mod source_type;

pub use definition::{ArtifactDefinition, Source, SUPPORTED_OS, TOP_LEVEL_KEYS};
pub use errors::{FormatError, MissingDependencyError, RegistryError, SourceTypeError};
pub use reader::ArtifactsReader;
pub use registry::ArtifactDefinitionsRegistry;
pub use source_type::{
    ArtifactGroupSourceType, Attributes, CommandSourceType, KeyValuePair, PathsSourceType,
    RegistryKeySourceType, RegistryValueSourceType, SourceType, SourceTypeConstructor,
    SourceTypeFactory, WmiQuerySourceType, REGISTRY_KEY_PREFIXES, TYPE_INDICATOR_ARTIFACT_GROUP,
    TYPE_INDICATOR_COMMAND, TYPE_INDICATOR_DIRECTORY, TYPE_INDICATOR_FILE,
    TYPE_INDICATOR_FILE_INFO, TYPE_INDICATOR_PATH, TYPE_INDICATOR_WINDOWS_REGISTRY_KEY,
    TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE, TYPE_INDICATOR_WMI_QUERY,
};
