use std::collections::{BTreeSet, HashMap};

use lazy_static::lazy_static;
use log::{debug, warn};

use crate::artifacts::{ArtifactDefinition, ArtifactDefinitionsRegistry, Source};

lazy_static! {
    /// Artifacts that are slow or noisy; a `true` entry is only collected when
    /// named in the include list.
    pub static ref BLACKLIST: HashMap<&'static str, bool> = HashMap::from([
        ("WMILoginUsers", false),
        ("WMIUsers", true),
        ("WMIVolumeShadowCopies", true),
    ]);
}

pub fn is_blacklisted(name: &str) -> bool {
    BLACKLIST.get(name).copied().unwrap_or(false)
}

/// Expands `names` through artifact groups, recursively.
///
/// The result holds the canonical names of the named definitions and of every
/// group member. Unknown names are logged and dropped; group members without a
/// definition are kept so they can still be excluded or included by name.
pub fn resolve_artifact_groups(registry: &ArtifactDefinitionsRegistry, names: &[String]) -> BTreeSet<String> {
    let mut resolved = BTreeSet::new();
    for name in names {
        match registry
            .get_definition_by_name(name)
            .or_else(|| registry.get_definition_by_alias(name))
        {
            Some(definition) => expand(registry, definition, &mut resolved),
            None => warn!("Unknown artifact '{}'", name),
        }
    }
    resolved
}

fn expand(registry: &ArtifactDefinitionsRegistry, definition: &ArtifactDefinition, resolved: &mut BTreeSet<String>) {
    if !resolved.insert(definition.name.clone()) {
        return;
    }
    for source in &definition.sources {
        for member in source.source_type.group_names() {
            match registry.get_definition_by_name(member) {
                Some(child) => expand(registry, child, resolved),
                None => {
                    resolved.insert(member.clone());
                }
            }
        }
    }
}

/// Filters for choosing the sources of a run.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
    pub platform: String,
    pub registry: bool,
}

impl Selection {
    pub fn definition_selected(&self, definition: &ArtifactDefinition) -> bool {
        let name = definition.name.as_str();
        if is_blacklisted(name) && !self.include.contains(name) {
            debug!("Skipping blacklisted artifact {}", name);
            return false;
        }
        if !self.include.is_empty() && !self.include.contains(name) {
            return false;
        }
        if self.exclude.contains(name) {
            return false;
        }
        definition.supports(&self.platform)
    }

    pub fn source_selected(&self, source: &Source) -> bool {
        source.supports(&self.platform) && (self.registry || !source.source_type.is_registry())
    }

    /// (definition, source) pairs to hand to the collector, ordered by artifact
    /// name.
    pub fn select<'a>(&self, definitions: &'a [ArtifactDefinition]) -> Vec<(&'a ArtifactDefinition, &'a Source)> {
        let mut selected: Vec<&ArtifactDefinition> = definitions
            .iter()
            .filter(|definition| self.definition_selected(definition))
            .collect();
        selected.sort_by(|a, b| a.name.cmp(&b.name));

        selected
            .into_iter()
            .flat_map(|definition| {
                definition
                    .sources
                    .iter()
                    .filter(|source| self.source_selected(source))
                    .map(move |source| (definition, source))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{
        ArtifactGroupSourceType, CommandSourceType, RegistryKeySourceType, SourceType,
    };

    fn command_artifact(name: &str) -> ArtifactDefinition {
        let mut definition = ArtifactDefinition::new(name, "");
        definition.sources.push(Source::new(SourceType::Command(CommandSourceType {
            cmd: "echo".to_string(),
            args: vec![name.to_string()],
        })));
        definition
    }

    fn group(name: &str, members: &[&str]) -> ArtifactDefinition {
        let mut definition = ArtifactDefinition::new(name, "");
        definition.sources.push(Source::new(SourceType::ArtifactGroup(ArtifactGroupSourceType {
            names: members.iter().map(|m| m.to_string()).collect(),
        })));
        definition
    }

    fn registry() -> ArtifactDefinitionsRegistry {
        let mut registry = ArtifactDefinitionsRegistry::new();
        for definition in [
            command_artifact("A"),
            command_artifact("B"),
            command_artifact("C"),
            command_artifact("WMIUsers"),
            command_artifact("WMILoginUsers"),
            group("Inner", &["B"]),
            group("Outer", &["A", "Inner"]),
        ] {
            registry.register_definition(definition).unwrap();
        }
        registry
    }

    fn names(pairs: &[(&ArtifactDefinition, &Source)]) -> Vec<String> {
        pairs.iter().map(|(d, _)| d.name.clone()).collect()
    }

    #[test]
    fn test_groups_resolve_recursively() {
        let registry = registry();
        let resolved = resolve_artifact_groups(&registry, &["outer".to_string(), "Missing".to_string()]);
        let expected: BTreeSet<String> = ["A", "B", "Inner", "Outer"].iter().map(|s| s.to_string()).collect();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_blacklist_unless_included() {
        let registry = registry();
        let definitions = registry.get_definitions();
        let selection = Selection {
            platform: "Linux".to_string(),
            ..Default::default()
        };
        let selected = names(&selection.select(&definitions));
        assert_eq!(selected, vec!["A", "B", "C", "Inner", "Outer", "WMILoginUsers"]);

        let selection = Selection {
            include: resolve_artifact_groups(&registry, &["WMIUsers".to_string()]),
            platform: "Linux".to_string(),
            ..Default::default()
        };
        assert_eq!(names(&selection.select(&definitions)), vec!["WMIUsers"]);
    }

    #[test]
    fn test_include_and_exclude() {
        let registry = registry();
        let definitions = registry.get_definitions();
        let selection = Selection {
            include: resolve_artifact_groups(&registry, &["Outer".to_string(), "C".to_string()]),
            exclude: resolve_artifact_groups(&registry, &["Inner".to_string()]),
            platform: "Linux".to_string(),
            registry: false,
        };
        assert_eq!(names(&selection.select(&definitions)), vec!["A", "C", "Outer"]);
    }

    #[test]
    fn test_platform_and_registry_filters() {
        let mut definition = command_artifact("RunKeys");
        definition.sources.push(Source::new(SourceType::RegistryKey(RegistryKeySourceType {
            keys: vec![r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Run".to_string()],
        })));
        definition.sources[0].supported_os = vec!["Darwin".to_string()];
        let mut windows_only = command_artifact("WindowsOnly");
        windows_only.supported_os = vec!["Windows".to_string()];
        let definitions = vec![definition, windows_only];

        let mut selection = Selection {
            platform: "Windows".to_string(),
            ..Default::default()
        };
        assert_eq!(names(&selection.select(&definitions)), vec!["WindowsOnly"]);

        selection.registry = true;
        let selected = selection.select(&definitions);
        assert_eq!(names(&selected), vec!["RunKeys", "WindowsOnly"]);
        assert!(selected[0].1.source_type.is_registry());
    }
}
