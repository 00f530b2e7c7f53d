use serde_json::{json, Map, Value};

use super::source_type::SourceType;

/// Operating systems a definition or source may be restricted to.
pub const SUPPORTED_OS: &[&str] = &["Android", "Darwin", "ESXi", "iOS", "Linux", "Windows"];

/// Keys allowed at the top level of a definition.
pub const TOP_LEVEL_KEYS: &[&str] = &[
    "aliases",
    "conditions",
    "doc",
    "labels",
    "name",
    "provides",
    "sources",
    "supported_os",
    "urls",
];

/// One source of an artifact definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub source_type: SourceType,
    pub supported_os: Vec<String>,
}

impl Source {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            supported_os: Vec::new(),
        }
    }

    pub fn type_indicator(&self) -> &'static str {
        self.source_type.type_indicator()
    }

    /// True when the source is not restricted or lists `os` (case-insensitive).
    pub fn supports(&self, os: &str) -> bool {
        supports_os(&self.supported_os, os)
    }

    pub fn as_dict(&self) -> Value {
        let mut value = json!({
            "type": self.type_indicator(),
            "attributes": Value::Object(self.source_type.as_dict()),
        });
        if !self.supported_os.is_empty() {
            value["supported_os"] = json!(self.supported_os);
        }
        value
    }
}

/// A named, documented recipe for collecting one kind of host evidence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactDefinition {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub sources: Vec<Source>,
    pub supported_os: Vec<String>,
    pub urls: Vec<String>,
}

impl ArtifactDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn supports(&self, os: &str) -> bool {
        supports_os(&self.supported_os, os)
    }

    pub fn as_dict(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), json!(self.name));
        if !self.aliases.is_empty() {
            map.insert("aliases".to_string(), json!(self.aliases));
        }
        map.insert("doc".to_string(), json!(self.description));
        map.insert(
            "sources".to_string(),
            Value::Array(self.sources.iter().map(Source::as_dict).collect()),
        );
        if !self.supported_os.is_empty() {
            map.insert("supported_os".to_string(), json!(self.supported_os));
        }
        if !self.urls.is_empty() {
            map.insert("urls".to_string(), json!(self.urls));
        }
        Value::Object(map)
    }
}

fn supports_os(supported: &[String], os: &str) -> bool {
    supported.is_empty() || supported.iter().any(|s| s.eq_ignore_ascii_case(os))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::source_type::{CommandSourceType, SourceType};

    #[test]
    fn test_supports_is_case_insensitive() {
        let mut definition = ArtifactDefinition::new("BashHistory", "Bash history");
        assert!(definition.supports("Linux"));

        definition.supported_os = vec!["Linux".to_string(), "Darwin".to_string()];
        assert!(definition.supports("linux"));
        assert!(!definition.supports("Windows"));
    }

    #[test]
    fn test_as_dict_omits_empty_fields() {
        let mut definition = ArtifactDefinition::new("Uptime", "System uptime");
        definition.sources.push(Source::new(SourceType::Command(CommandSourceType {
            cmd: "uptime".to_string(),
            args: vec!["-p".to_string()],
        })));

        let dict = definition.as_dict();
        assert_eq!(dict["name"], "Uptime");
        assert_eq!(dict["doc"], "System uptime");
        assert_eq!(dict["sources"][0]["type"], "COMMAND");
        assert_eq!(dict["sources"][0]["attributes"]["cmd"], "uptime");
        assert!(dict.get("aliases").is_none());
        assert!(dict.get("urls").is_none());
        assert!(dict.get("supported_os").is_none());
    }
}
