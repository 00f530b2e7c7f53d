//! Collection backends.
//!
//! Every selected source is offered to the backends in a fixed order. The
//! first backend that claims it executes it during [`Collector::collect`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Collector                   │
//! │        register_source() / collect()         │
//! ├───────────┬────────────┬───────────┬─────────┤
//! │ Commands  │ FileSystem │ Registry  │   WMI   │
//! │ COMMAND   │ FILE       │ REG_KEY   │ WMI     │
//! │           │ FILE_INFO  │ REG_VALUE │         │
//! │           │ PATH / DIR │           │         │
//! ├───────────┴────────────┴───────────┴─────────┤
//! │                   Outputs                    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ARTIFACT_GROUP sources are never claimed; groups are expanded when the
//! artifacts are selected.
//!
//! ## Usage Example
//!
//! ```no_run
//! use artifact_collector::collectors::{current_platform, Collector};
//! use artifact_collector::output::Outputs;
//! use artifact_collector::variables::HostVariables;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let platform = current_platform().ok_or_else(|| anyhow::anyhow!("unsupported platform"))?;
//! let variables = HostVariables::for_platform(platform);
//! let mut collector = Collector::with_default_collectors(platform, variables, None)?;
//! let mut outputs = Outputs::new(Path::new("."), 0, false)?;
//! collector.collect(&mut outputs)?;
//! # Ok(())
//! # }
//! ```

/// Backend trait and source dispatcher
pub mod collector;

/// COMMAND sources
pub mod commands;

/// FILE, FILE_INFO, PATH and DIRECTORY sources
pub mod files;

/// REGISTRY_KEY and REGISTRY_VALUE sources
pub mod registry;

/// WMI sources
pub mod wmi;

pub use self::collector::{current_platform, AbstractCollector, Collector};
pub use self::commands::CommandExecutor;
pub use self::files::{FileSystemManager, MountPoint};
pub use self::registry::RegistryCollector;
pub use self::wmi::WmiExecutor;
