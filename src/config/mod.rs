//! Run configuration: the settings file, size limits and the choice of
//! artifacts to collect.

mod selection;
mod settings;
mod size;

pub use selection::{is_blacklisted, resolve_artifact_groups, Selection, BLACKLIST};
pub use settings::{split_list, CollectorSettings};
pub use size::parse_human_size;
