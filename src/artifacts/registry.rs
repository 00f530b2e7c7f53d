use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::Result;
use log::{debug, warn};

use super::definition::ArtifactDefinition;
use super::errors::{MissingDependencyError, RegistryError, SourceTypeError};
use super::reader::ArtifactsReader;
use super::source_type::{Attributes, SourceType, SourceTypeFactory};

/// Definitions indexed by name and alias, both case-insensitive.
#[derive(Debug, Default)]
pub struct ArtifactDefinitionsRegistry {
    factory: SourceTypeFactory,
    definitions: HashMap<String, ArtifactDefinition>,
    aliases: HashMap<String, String>,
    // lower-cased referenced name -> (name as first written, reference count)
    group_references: HashMap<String, (String, usize)>,
}

impl ArtifactDefinitionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(factory: SourceTypeFactory) -> Self {
        Self {
            factory,
            ..Default::default()
        }
    }

    pub fn factory(&self) -> &SourceTypeFactory {
        &self.factory
    }

    pub fn create_source_type(
        &self,
        type_indicator: &str,
        attributes: &Attributes,
    ) -> Result<SourceType, SourceTypeError> {
        self.factory.create_source_type(type_indicator, attributes)
    }

    /// Adds a definition. The name and aliases must not clash with any name or
    /// alias already present.
    pub fn register_definition(&mut self, definition: ArtifactDefinition) -> Result<(), RegistryError> {
        let name = definition.name.to_lowercase();
        if self.definitions.contains_key(&name) || self.aliases.contains_key(&name) {
            return Err(RegistryError::DuplicateName(definition.name.clone()));
        }

        let mut seen = BTreeSet::new();
        for alias in &definition.aliases {
            let lower = alias.to_lowercase();
            if lower == name
                || !seen.insert(lower.clone())
                || self.aliases.contains_key(&lower)
                || self.definitions.contains_key(&lower)
            {
                return Err(RegistryError::DuplicateAlias(alias.clone()));
            }
        }

        for alias in &definition.aliases {
            self.aliases.insert(alias.to_lowercase(), name.clone());
        }
        for source in &definition.sources {
            for referenced in source.source_type.group_names() {
                let entry = self
                    .group_references
                    .entry(referenced.to_lowercase())
                    .or_insert_with(|| (referenced.clone(), 0));
                entry.1 += 1;
            }
        }

        self.definitions.insert(name, definition);
        Ok(())
    }

    /// Removes a definition together with its aliases and group references.
    pub fn deregister_definition(&mut self, name: &str) -> Result<ArtifactDefinition, RegistryError> {
        let definition = self
            .definitions
            .remove(&name.to_lowercase())
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        for alias in &definition.aliases {
            self.aliases.remove(&alias.to_lowercase());
        }
        for source in &definition.sources {
            for referenced in source.source_type.group_names() {
                let key = referenced.to_lowercase();
                if let Some(entry) = self.group_references.get_mut(&key) {
                    entry.1 = entry.1.saturating_sub(1);
                    if entry.1 == 0 {
                        self.group_references.remove(&key);
                    }
                }
            }
        }

        Ok(definition)
    }

    pub fn get_definition_by_name(&self, name: &str) -> Option<&ArtifactDefinition> {
        self.definitions.get(&name.to_lowercase())
    }

    pub fn get_definition_by_alias(&self, alias: &str) -> Option<&ArtifactDefinition> {
        self.aliases
            .get(&alias.to_lowercase())
            .and_then(|name| self.definitions.get(name))
    }

    /// Snapshot of every registered definition, in no particular order.
    pub fn get_definitions(&self) -> Vec<ArtifactDefinition> {
        self.definitions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Names referenced by artifact groups that have no definition.
    pub fn get_undefined_artifacts(&self) -> Vec<String> {
        let mut undefined: Vec<String> = self
            .group_references
            .iter()
            .filter(|(lower, _)| !self.definitions.contains_key(*lower))
            .map(|(_, (original, _))| original.clone())
            .collect();
        undefined.sort();
        undefined
    }

    pub fn check_dependencies(&self) -> Result<(), MissingDependencyError> {
        let undefined = self.get_undefined_artifacts();
        if undefined.is_empty() {
            Ok(())
        } else {
            Err(MissingDependencyError(undefined))
        }
    }

    /// Reads every definition file in `path` and registers what it can.
    ///
    /// Returns the number of definitions registered. Conflicting definitions are
    /// logged and skipped.
    pub fn read_from_directory(
        &mut self,
        reader: &ArtifactsReader,
        path: &Path,
        extension: Option<&str>,
    ) -> Result<usize> {
        let definitions = reader.read_directory(path, extension)?;
        let mut registered = 0;
        for definition in definitions {
            let name = definition.name.clone();
            match self.register_definition(definition) {
                Ok(()) => registered += 1,
                Err(e) => warn!("Skipping artifact definition {}: {}", name, e),
            }
        }
        debug!("Registered {} artifact definitions from {}", registered, path.display());
        Ok(registered)
    }
}
