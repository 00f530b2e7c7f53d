use thiserror::Error;

/// A definition file that does not follow the artifact schema.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FormatError(pub String);

/// Attributes that cannot build a source type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceTypeError {
    #[error("Missing {0}.")]
    MissingAttribute(&'static str),

    #[error("Invalid {attribute}: {reason}")]
    InvalidAttribute {
        attribute: &'static str,
        reason: String,
    },

    #[error("Unsupported source type indicator: {0}")]
    UnsupportedType(String),

    #[error("Source type indicator {0} already registered")]
    AlreadyRegistered(String),

    #[error("Source type indicator {0} is not registered")]
    NotRegistered(String),
}

impl SourceTypeError {
    pub(crate) fn invalid(attribute: &'static str, reason: impl Into<String>) -> Self {
        SourceTypeError::InvalidAttribute {
            attribute,
            reason: reason.into(),
        }
    }
}

/// Conflicts in the definitions registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Artifact definition already set for name: {0}")]
    DuplicateName(String),

    #[error("Artifact definition already set for alias: {0}")]
    DuplicateAlias(String),

    #[error("Artifact definition not set for name: {0}")]
    NotRegistered(String),

    #[error("{0}")]
    SourceType(#[from] SourceTypeError),
}

/// Artifact groups that reference names nobody registered.
#[derive(Debug, Error)]
#[error("Missing artifact definitions: {}", .0.join(", "))]
pub struct MissingDependencyError(pub Vec<String>);
