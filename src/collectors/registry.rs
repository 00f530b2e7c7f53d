use log::{debug, info, warn};

use super::collector::AbstractCollector;
use crate::artifacts::{ArtifactDefinition, Source, SourceType};
use crate::filesystem::pipeline::resolve;
use crate::filesystem::registry::split_hive;
use crate::filesystem::{RegistryBackend, RegistryFileSystem};
use crate::output::Outputs;
use crate::variables::HostVariables;

#[derive(Debug, Clone)]
struct KeyEntry {
    artifact: String,
    key: String,
    // None collects every value of the key
    value: Option<String>,
}

/// Collects REGISTRY_KEY and REGISTRY_VALUE sources.
pub struct RegistryCollector {
    backend: Option<Box<dyn RegistryBackend>>,
    entries: Vec<KeyEntry>,
}

impl Default for RegistryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryCollector {
    /// Reads the live registry on Windows; elsewhere registry sources are refused.
    pub fn new() -> Self {
        #[cfg(target_os = "windows")]
        let backend: Option<Box<dyn RegistryBackend>> = Some(Box::new(crate::filesystem::WinRegistry::new()));
        #[cfg(not(target_os = "windows"))]
        let backend: Option<Box<dyn RegistryBackend>> = None;

        Self {
            backend,
            entries: Vec::new(),
        }
    }

    pub fn with_backend(backend: Box<dyn RegistryBackend>) -> Self {
        Self {
            backend: Some(backend),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add_key(&mut self, artifact: &str, key: &str, value: Option<&str>, variables: &HostVariables) {
        for key in variables.substitute(key) {
            self.entries.push(KeyEntry {
                artifact: artifact.to_string(),
                key,
                value: value.map(str::to_string),
            });
        }
    }
}

impl AbstractCollector for RegistryCollector {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn register_source(
        &mut self,
        definition: &ArtifactDefinition,
        source: &Source,
        variables: &HostVariables,
    ) -> bool {
        if self.backend.is_none() || !source.source_type.is_registry() {
            return false;
        }
        match &source.source_type {
            SourceType::RegistryKey(registry) => {
                for key in &registry.keys {
                    self.add_key(&definition.name, key, None, variables);
                }
            }
            SourceType::RegistryValue(registry) => {
                for pair in &registry.key_value_pairs {
                    self.add_key(&definition.name, &pair.key, Some(&pair.value), variables);
                }
            }
            _ => return false,
        }
        true
    }

    fn collect(&mut self, output: &mut Outputs) {
        let Some(backend) = self.backend.as_deref() else {
            return;
        };
        if !self.entries.is_empty() {
            info!("Reading {} registry keys...", self.entries.len());
        }

        for entry in &self.entries {
            let (hive, rest) = split_hive(&entry.key);
            let fs = RegistryFileSystem::new(backend, hive);
            debug!("Resolving registry key {}", entry.key);

            for key in resolve(&fs, rest, true) {
                match &entry.value {
                    None => match fs.key_values(&key) {
                        Ok(values) => {
                            for value in values {
                                output.add_collected_registry_value(
                                    &entry.artifact,
                                    &key.path,
                                    &value.name,
                                    value.value,
                                    &value.value_type,
                                );
                            }
                        }
                        Err(e) => warn!("Unable to read values of {}: {}", key.path, e),
                    },
                    Some(name) => match fs.key_value(&key, name) {
                        Ok(Some(value)) => output.add_collected_registry_value(
                            &entry.artifact,
                            &key.path,
                            &value.name,
                            value.value,
                            &value.value_type,
                        ),
                        Ok(None) => debug!("Value '{}' not found in {}", name, key.path),
                        Err(e) => warn!("Unable to read value '{}' of {}: {}", name, key.path, e),
                    },
                }
            }
        }
    }
}
