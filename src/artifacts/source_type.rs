//! Typed artifact sources and the factory that builds them from raw attributes.
//!
//! Every source in a definition carries a type indicator and an attribute map.
//! The factory validates the attributes for the indicator and produces one
//! variant of [`SourceType`]. Nothing is coerced: a wrong shape is an error.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::errors::SourceTypeError;

/// Raw attribute map of a source.
pub type Attributes = Map<String, Value>;

/// Builds a source type from its attributes.
pub type SourceTypeConstructor = fn(&Attributes) -> Result<SourceType, SourceTypeError>;

pub const TYPE_INDICATOR_ARTIFACT_GROUP: &str = "ARTIFACT_GROUP";
pub const TYPE_INDICATOR_COMMAND: &str = "COMMAND";
pub const TYPE_INDICATOR_DIRECTORY: &str = "DIRECTORY";
pub const TYPE_INDICATOR_FILE: &str = "FILE";
pub const TYPE_INDICATOR_FILE_INFO: &str = "FILE_INFO";
pub const TYPE_INDICATOR_PATH: &str = "PATH";
pub const TYPE_INDICATOR_WINDOWS_REGISTRY_KEY: &str = "REGISTRY_KEY";
pub const TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE: &str = "REGISTRY_VALUE";
pub const TYPE_INDICATOR_WMI_QUERY: &str = "WMI";

/// Key prefixes a registry source may start with.
pub const REGISTRY_KEY_PREFIXES: &[&str] = &[
    "HKEY_LOCAL_MACHINE",
    "HKEY_USERS",
    "HKEY_CLASSES_ROOT",
    "%%current_control_set%%",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactGroupSourceType {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSourceType {
    pub cmd: String,
    pub args: Vec<String>,
}

/// Paths shared by DIRECTORY, FILE, PATH and FILE_INFO sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsSourceType {
    pub paths: Vec<String>,
    pub separator: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryKeySourceType {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValueSourceType {
    pub key_value_pairs: Vec<KeyValuePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WmiQuerySourceType {
    pub query: String,
    pub base_object: Option<String>,
}

/// A validated artifact source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceType {
    ArtifactGroup(ArtifactGroupSourceType),
    Command(CommandSourceType),
    Directory(PathsSourceType),
    File(PathsSourceType),
    FileInfo(PathsSourceType),
    Path(PathsSourceType),
    RegistryKey(RegistryKeySourceType),
    RegistryValue(RegistryValueSourceType),
    Wmi(WmiQuerySourceType),
}

impl SourceType {
    pub fn type_indicator(&self) -> &'static str {
        match self {
            SourceType::ArtifactGroup(_) => TYPE_INDICATOR_ARTIFACT_GROUP,
            SourceType::Command(_) => TYPE_INDICATOR_COMMAND,
            SourceType::Directory(_) => TYPE_INDICATOR_DIRECTORY,
            SourceType::File(_) => TYPE_INDICATOR_FILE,
            SourceType::FileInfo(_) => TYPE_INDICATOR_FILE_INFO,
            SourceType::Path(_) => TYPE_INDICATOR_PATH,
            SourceType::RegistryKey(_) => TYPE_INDICATOR_WINDOWS_REGISTRY_KEY,
            SourceType::RegistryValue(_) => TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE,
            SourceType::Wmi(_) => TYPE_INDICATOR_WMI_QUERY,
        }
    }

    /// Attribute map equivalent to this source, suitable for re-creating it.
    pub fn as_dict(&self) -> Attributes {
        let value = match self {
            SourceType::ArtifactGroup(group) => json!({ "names": group.names }),
            SourceType::Command(command) => json!({ "cmd": command.cmd, "args": command.args }),
            SourceType::Directory(paths)
            | SourceType::File(paths)
            | SourceType::FileInfo(paths)
            | SourceType::Path(paths) => {
                let mut value = json!({ "paths": paths.paths });
                if paths.separator != "/" {
                    value["separator"] = json!(paths.separator);
                }
                value
            }
            SourceType::RegistryKey(keys) => json!({ "keys": keys.keys }),
            SourceType::RegistryValue(values) => {
                let pairs: Vec<Value> = values
                    .key_value_pairs
                    .iter()
                    .map(|pair| json!({ "key": pair.key, "value": pair.value }))
                    .collect();
                json!({ "key_value_pairs": pairs })
            }
            SourceType::Wmi(wmi) => {
                let mut value = json!({ "query": wmi.query });
                if let Some(base_object) = wmi.base_object.as_deref().filter(|b| !b.is_empty()) {
                    value["base_object"] = json!(base_object);
                }
                value
            }
        };

        match value {
            Value::Object(map) => map,
            _ => Attributes::new(),
        }
    }

    /// Names referenced by an artifact group, empty for every other kind.
    pub fn group_names(&self) -> &[String] {
        match self {
            SourceType::ArtifactGroup(group) => &group.names,
            _ => &[],
        }
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, SourceType::RegistryKey(_) | SourceType::RegistryValue(_))
    }
}

fn string_list(attributes: &Attributes, key: &'static str) -> Result<Vec<String>, SourceTypeError> {
    let value = attributes
        .get(key)
        .ok_or(SourceTypeError::MissingAttribute(key))?;
    let items = value
        .as_array()
        .ok_or_else(|| SourceTypeError::invalid(key, "expected a list of strings"))?;
    if items.is_empty() {
        return Err(SourceTypeError::MissingAttribute(key));
    }
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| SourceTypeError::invalid(key, format!("{} is not a string", item)))
        })
        .collect()
}

fn required_string(attributes: &Attributes, key: &'static str) -> Result<String, SourceTypeError> {
    match attributes.get(key) {
        None => Err(SourceTypeError::MissingAttribute(key)),
        Some(Value::String(s)) if s.is_empty() => Err(SourceTypeError::MissingAttribute(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(SourceTypeError::invalid(key, format!("{} is not a string", other))),
    }
}

fn optional_string(attributes: &Attributes, key: &'static str) -> Result<Option<String>, SourceTypeError> {
    match attributes.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SourceTypeError::invalid(key, format!("{} is not a string", other))),
    }
}

fn check_registry_key(key: &str) -> Result<(), SourceTypeError> {
    let upper = key.to_uppercase();
    let known = REGISTRY_KEY_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(&prefix.to_uppercase()));
    if known {
        Ok(())
    } else {
        Err(SourceTypeError::invalid("keys", format!("unsupported registry key: {}", key)))
    }
}

fn paths(attributes: &Attributes) -> Result<PathsSourceType, SourceTypeError> {
    let paths = string_list(attributes, "paths")?;
    let separator = optional_string(attributes, "separator")?
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/".to_string());
    Ok(PathsSourceType { paths, separator })
}

fn artifact_group(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    let names = string_list(attributes, "names")?;
    Ok(SourceType::ArtifactGroup(ArtifactGroupSourceType { names }))
}

fn command(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    let cmd = required_string(attributes, "cmd")?;
    let args = string_list(attributes, "args")?;
    Ok(SourceType::Command(CommandSourceType { cmd, args }))
}

fn directory(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    Ok(SourceType::Directory(paths(attributes)?))
}

fn file(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    Ok(SourceType::File(paths(attributes)?))
}

fn file_info(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    Ok(SourceType::FileInfo(paths(attributes)?))
}

fn path(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    Ok(SourceType::Path(paths(attributes)?))
}

fn registry_key(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    let keys = string_list(attributes, "keys")?;
    for key in &keys {
        check_registry_key(key)?;
    }
    Ok(SourceType::RegistryKey(RegistryKeySourceType { keys }))
}

fn registry_value(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    let raw = attributes
        .get("key_value_pairs")
        .ok_or(SourceTypeError::MissingAttribute("key_value_pairs"))?
        .as_array()
        .ok_or_else(|| SourceTypeError::invalid("key_value_pairs", "expected a list of mappings"))?;
    if raw.is_empty() {
        return Err(SourceTypeError::MissingAttribute("key_value_pairs"));
    }

    let mut key_value_pairs = Vec::with_capacity(raw.len());
    for item in raw {
        let pair = item
            .as_object()
            .ok_or_else(|| SourceTypeError::invalid("key_value_pairs", format!("{} is not a mapping", item)))?;
        let key = required_string(pair, "key")?;
        let value = match pair.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(SourceTypeError::invalid("value", format!("{} is not a string", other)))
            }
            None => return Err(SourceTypeError::MissingAttribute("value")),
        };
        check_registry_key(&key)?;
        key_value_pairs.push(KeyValuePair { key, value });
    }
    Ok(SourceType::RegistryValue(RegistryValueSourceType { key_value_pairs }))
}

fn wmi_query(attributes: &Attributes) -> Result<SourceType, SourceTypeError> {
    let query = required_string(attributes, "query")?;
    let base_object = optional_string(attributes, "base_object")?;
    Ok(SourceType::Wmi(WmiQuerySourceType { query, base_object }))
}

/// Maps type indicators to constructors.
#[derive(Debug, Clone)]
pub struct SourceTypeFactory {
    constructors: BTreeMap<String, SourceTypeConstructor>,
}

impl Default for SourceTypeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTypeFactory {
    /// Factory with every built-in source type registered.
    pub fn new() -> Self {
        let builtin: [(&str, SourceTypeConstructor); 9] = [
            (TYPE_INDICATOR_ARTIFACT_GROUP, artifact_group),
            (TYPE_INDICATOR_COMMAND, command),
            (TYPE_INDICATOR_DIRECTORY, directory),
            (TYPE_INDICATOR_FILE, file),
            (TYPE_INDICATOR_FILE_INFO, file_info),
            (TYPE_INDICATOR_PATH, path),
            (TYPE_INDICATOR_WINDOWS_REGISTRY_KEY, registry_key),
            (TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE, registry_value),
            (TYPE_INDICATOR_WMI_QUERY, wmi_query),
        ];
        let constructors = builtin
            .into_iter()
            .map(|(indicator, constructor)| (indicator.to_string(), constructor))
            .collect();
        Self { constructors }
    }

    pub fn create_source_type(
        &self,
        type_indicator: &str,
        attributes: &Attributes,
    ) -> Result<SourceType, SourceTypeError> {
        let constructor = self
            .constructors
            .get(type_indicator)
            .ok_or_else(|| SourceTypeError::UnsupportedType(type_indicator.to_string()))?;
        constructor(attributes)
    }

    pub fn register_constructor(
        &mut self,
        type_indicator: &str,
        constructor: SourceTypeConstructor,
    ) -> Result<(), SourceTypeError> {
        if self.constructors.contains_key(type_indicator) {
            return Err(SourceTypeError::AlreadyRegistered(type_indicator.to_string()));
        }
        self.constructors.insert(type_indicator.to_string(), constructor);
        Ok(())
    }

    pub fn deregister_constructor(&mut self, type_indicator: &str) -> Result<(), SourceTypeError> {
        self.constructors
            .remove(type_indicator)
            .map(|_| ())
            .ok_or_else(|| SourceTypeError::NotRegistered(type_indicator.to_string()))
    }

    pub fn indicators(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("attributes must be an object"),
        }
    }

    #[test]
    fn test_missing_attributes_are_rejected() {
        let factory = SourceTypeFactory::new();
        let empty = Attributes::new();

        for indicator in [
            TYPE_INDICATOR_ARTIFACT_GROUP,
            TYPE_INDICATOR_COMMAND,
            TYPE_INDICATOR_DIRECTORY,
            TYPE_INDICATOR_FILE,
            TYPE_INDICATOR_PATH,
            TYPE_INDICATOR_WINDOWS_REGISTRY_KEY,
            TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE,
            TYPE_INDICATOR_WMI_QUERY,
        ] {
            assert!(
                factory.create_source_type(indicator, &empty).is_err(),
                "{} accepted empty attributes",
                indicator
            );
        }
    }

    #[test]
    fn test_wrong_shapes_are_rejected() {
        let factory = SourceTypeFactory::new();

        let cases = [
            (TYPE_INDICATOR_ARTIFACT_GROUP, json!({ "names": "NotAList" })),
            (TYPE_INDICATOR_COMMAND, json!({ "cmd": "ls", "args": [] })),
            (TYPE_INDICATOR_COMMAND, json!({ "cmd": 1, "args": ["-l"] })),
            (TYPE_INDICATOR_FILE, json!({ "paths": [1, 2] })),
            (TYPE_INDICATOR_WINDOWS_REGISTRY_KEY, json!({ "keys": ["HKEY_BOGUS\\Software"] })),
            (
                TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE,
                json!({ "key_value_pairs": [{ "key": "HKEY_LOCAL_MACHINE\\Software" }] }),
            ),
            (TYPE_INDICATOR_WMI_QUERY, json!({ "query": "" })),
        ];

        for (indicator, value) in cases {
            assert!(
                factory.create_source_type(indicator, &attrs(value.clone())).is_err(),
                "{} accepted {}",
                indicator,
                value
            );
        }
    }

    #[test]
    fn test_minimal_attributes_round_trip() {
        let factory = SourceTypeFactory::new();

        let cases = [
            (TYPE_INDICATOR_ARTIFACT_GROUP, json!({ "names": ["WindowsRunKeys"] })),
            (TYPE_INDICATOR_COMMAND, json!({ "cmd": "netstat", "args": ["-an"] })),
            (TYPE_INDICATOR_DIRECTORY, json!({ "paths": ["/var/log"] })),
            (TYPE_INDICATOR_FILE, json!({ "paths": ["%%environ_systemroot%%\\System32\\config\\SAM"], "separator": "\\" })),
            (TYPE_INDICATOR_FILE_INFO, json!({ "paths": ["/usr/bin/*"] })),
            (TYPE_INDICATOR_PATH, json!({ "paths": ["/tmp"] })),
            (TYPE_INDICATOR_WINDOWS_REGISTRY_KEY, json!({ "keys": ["HKEY_USERS\\%%users.sid%%\\Software\\*"] })),
            (
                TYPE_INDICATOR_WINDOWS_REGISTRY_VALUE,
                json!({ "key_value_pairs": [{ "key": "HKEY_LOCAL_MACHINE\\System\\Select", "value": "Current" }] }),
            ),
            (TYPE_INDICATOR_WMI_QUERY, json!({ "query": "SELECT * FROM Win32_Service", "base_object": "winmgmts:\\root\\cimv2" })),
        ];

        for (indicator, value) in cases {
            let source = factory
                .create_source_type(indicator, &attrs(value.clone()))
                .unwrap_or_else(|e| panic!("{}: {}", indicator, e));
            assert_eq!(source.type_indicator(), indicator);
            assert_eq!(Value::Object(source.as_dict()), value);
        }
    }

    #[test]
    fn test_default_separator_is_omitted() {
        let factory = SourceTypeFactory::new();
        let source = factory
            .create_source_type(TYPE_INDICATOR_PATH, &attrs(json!({ "paths": ["/etc"], "separator": "/" })))
            .unwrap();
        assert!(!source.as_dict().contains_key("separator"));
    }

    #[test]
    fn test_registry_prefix_is_case_insensitive() {
        let factory = SourceTypeFactory::new();
        let source = factory.create_source_type(
            TYPE_INDICATOR_WINDOWS_REGISTRY_KEY,
            &attrs(json!({ "keys": ["hkey_local_machine\\Software"] })),
        );
        assert!(source.is_ok());
    }

    #[test]
    fn test_unknown_indicator() {
        let factory = SourceTypeFactory::new();
        let err = factory
            .create_source_type("DIRECTORY_LISTING", &Attributes::new())
            .unwrap_err();
        assert_eq!(err, SourceTypeError::UnsupportedType("DIRECTORY_LISTING".to_string()));
    }

    #[test]
    fn test_register_and_deregister_constructor() {
        let mut factory = SourceTypeFactory::new();
        assert!(factory.register_constructor(TYPE_INDICATOR_FILE, file).is_err());

        factory.deregister_constructor(TYPE_INDICATOR_FILE).unwrap();
        assert!(!factory.indicators().contains(&TYPE_INDICATOR_FILE));
        assert!(factory.deregister_constructor(TYPE_INDICATOR_FILE).is_err());

        factory.register_constructor(TYPE_INDICATOR_FILE, file).unwrap();
        assert!(factory.indicators().contains(&TYPE_INDICATOR_FILE));
    }
}
