//! Reading artifact definitions from YAML and JSON files.
//!
//! YAML files may hold several documents, each either a single definition or a
//! sequence of definitions. JSON files hold an array of definitions. Every
//! definition is validated against the artifact schema before it is returned,
//! and errors carry the name of the last good definition to help locate them.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::definition::{ArtifactDefinition, Source, SUPPORTED_OS, TOP_LEVEL_KEYS};
use super::errors::FormatError;
use super::source_type::{Attributes, SourceTypeFactory};

/// Parses and validates artifact definitions.
#[derive(Debug, Clone, Default)]
pub struct ArtifactsReader {
    factory: SourceTypeFactory,
}

impl ArtifactsReader {
    pub fn new(factory: SourceTypeFactory) -> Self {
        Self { factory }
    }

    /// Validates one raw definition and builds it.
    pub fn read_definition_values(&self, values: &Value) -> Result<ArtifactDefinition, FormatError> {
        let values = values
            .as_object()
            .ok_or_else(|| FormatError("Missing artifact definition values.".to_string()))?;

        let mut undefined: Vec<&str> = values
            .keys()
            .map(String::as_str)
            .filter(|key| *key != "collectors" && !TOP_LEVEL_KEYS.contains(key))
            .collect();
        if !undefined.is_empty() {
            undefined.sort_unstable();
            return Err(FormatError(format!("Undefined keys: {}", undefined.join(", "))));
        }

        let name = match values.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => return Err(FormatError("Invalid artifact definition missing name.".to_string())),
        };

        let description = match values.get("doc") {
            Some(Value::String(doc)) if !doc.is_empty() => doc.clone(),
            _ => {
                return Err(FormatError(format!(
                    "Invalid artifact definition: {} missing description.",
                    name
                )))
            }
        };

        let mut definition = ArtifactDefinition::new(name.clone(), description);
        definition.aliases = string_list(values, "aliases", &name)?;

        if let Some(Value::Array(collectors)) = values.get("collectors") {
            if !collectors.is_empty() {
                return Err(FormatError(format!(
                    "Invalid artifact definition: {} still uses collectors.",
                    name
                )));
            }
        }

        definition.urls = string_list(values, "urls", &name)?;
        definition.supported_os = supported_os(values, &name)?;
        definition.sources = self.read_sources(values, &definition, &name)?;

        Ok(definition)
    }

    fn read_sources(
        &self,
        values: &Map<String, Value>,
        definition: &ArtifactDefinition,
        name: &str,
    ) -> Result<Vec<Source>, FormatError> {
        let raw_sources = match values.get("sources") {
            None => {
                return Err(FormatError(format!(
                    "Invalid artifact definition: {} missing sources.",
                    name
                )))
            }
            Some(Value::Array(sources)) if sources.is_empty() => {
                return Err(FormatError(format!(
                    "Invalid artifact definition: {} missing sources.",
                    name
                )))
            }
            Some(Value::Array(sources)) => sources,
            Some(_) => {
                return Err(FormatError(format!(
                    "Invalid artifact definition: {} sources is not a list.",
                    name
                )))
            }
        };

        let mut sources = Vec::with_capacity(raw_sources.len());
        for raw in raw_sources {
            let source = raw
                .as_object()
                .ok_or_else(|| FormatError(format!("Invalid source format in artifact: {}", name)))?;

            let type_indicator = match source.get("type") {
                Some(Value::String(t)) if !t.is_empty() => t.as_str(),
                _ => {
                    return Err(FormatError(format!(
                        "Invalid artifact definition: {} source type.",
                        name
                    )))
                }
            };

            let attributes = match source.get("attributes") {
                None | Some(Value::Null) => Attributes::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(FormatError(format!(
                        "Invalid artifact definition: {} attributes is not a map.",
                        name
                    )))
                }
            };

            if source.contains_key("returned_types") {
                return Err(FormatError(format!(
                    "Invalid artifact definition: {} returned_types no longer supported.",
                    name
                )));
            }

            let source_type = self
                .factory
                .create_source_type(type_indicator, &attributes)
                .map_err(|e| {
                    FormatError(format!("Invalid artifact definition: {}, with error: {}", name, e))
                })?;

            let source_os = supported_os(source, name)?;
            if let Some(os) = source_os
                .iter()
                .find(|os| !definition.supported_os.contains(os))
            {
                return Err(FormatError(format!(
                    "Source OS {} not in artifact supported OS for: {}",
                    os, name
                )));
            }

            sources.push(Source {
                source_type,
                supported_os: source_os,
            });
        }
        Ok(sources)
    }

    /// Reads every definition of a YAML text, across all of its documents.
    pub fn read_yaml_str(&self, text: &str) -> Result<Vec<ArtifactDefinition>, FormatError> {
        let mut raw = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| FormatError(format!("Unable to parse YAML: {}", e)))?;
            let value = serde_json::to_value(value)
                .map_err(|e| FormatError(format!("Unsupported YAML content: {}", e)))?;
            match value {
                Value::Null => {}
                Value::Array(items) => raw.extend(items),
                other => raw.push(other),
            }
        }
        self.read_values(&raw)
    }

    /// Reads a JSON array of definitions.
    pub fn read_json_str(&self, text: &str) -> Result<Vec<ArtifactDefinition>, FormatError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FormatError(format!("Unable to parse JSON: {}", e)))?;
        match value {
            Value::Array(items) => self.read_values(&items),
            _ => Err(FormatError("JSON definitions must be an array.".to_string())),
        }
    }

    fn read_values(&self, values: &[Value]) -> Result<Vec<ArtifactDefinition>, FormatError> {
        let mut definitions: Vec<ArtifactDefinition> = Vec::with_capacity(values.len());
        for value in values {
            let definition = self.read_definition_values(value).map_err(|e| {
                let location = match definitions.last() {
                    Some(last) => format!("After: {}", last.name),
                    None => "At start".to_string(),
                };
                FormatError(format!("{}: {}", location, e))
            })?;
            definitions.push(definition);
        }
        Ok(definitions)
    }

    /// Reads a definition file, JSON for `.json` and YAML for anything else.
    pub fn read_file(&self, path: &Path) -> Result<Vec<ArtifactDefinition>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read definitions file: {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let definitions = if is_json {
            self.read_json_str(&text)
        } else {
            self.read_yaml_str(&text)
        };
        definitions.with_context(|| format!("Invalid definitions file: {}", path.display()))
    }

    /// Reads `path/*.<extension>` (or every file) in sorted order.
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn read_directory(&self, path: &Path, extension: Option<&str>) -> Result<Vec<ArtifactDefinition>> {
        let pattern = match extension {
            Some(ext) => path.join(format!("*.{}", ext.trim_start_matches('.'))),
            None => path.join("*"),
        };
        let pattern = pattern.to_string_lossy().to_string();

        let mut files: Vec<_> = glob::glob(&pattern)
            .with_context(|| format!("Invalid definitions pattern: {}", pattern))?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let mut definitions = Vec::new();
        for file in files {
            match self.read_file(&file) {
                Ok(mut read) => definitions.append(&mut read),
                Err(e) => warn!("Skipping definitions file {}: {:#}", file.display(), e),
            }
        }
        Ok(definitions)
    }
}

fn string_list(values: &Map<String, Value>, key: &str, name: &str) -> Result<Vec<String>, FormatError> {
    match values.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()),
        Some(_) => Err(FormatError(format!(
            "Invalid artifact definition: {} {} is not a list.",
            name, key
        ))),
    }
}

fn supported_os(values: &Map<String, Value>, name: &str) -> Result<Vec<String>, FormatError> {
    let raw = match values.get("supported_os") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(FormatError(format!("Invalid supported_os type: {}", other))),
    };

    raw.iter()
        .map(|item| {
            let os = item
                .as_str()
                .ok_or_else(|| FormatError(format!("supported_os element is not a string: {}", item)))?;
            if SUPPORTED_OS.contains(&os) {
                Ok(os.to_string())
            } else {
                Err(FormatError(format!(
                    "Artifact definition: {} undefined supported operating system: {}.",
                    name, os
                )))
            }
        })
        .collect()
}
