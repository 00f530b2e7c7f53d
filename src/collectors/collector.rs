use std::path::PathBuf;

use anyhow::Result;
use log::{debug, info, warn};

use super::commands::CommandExecutor;
use super::files::FileSystemManager;
use super::registry::RegistryCollector;
use super::wmi::WmiExecutor;
use crate::artifacts::{ArtifactDefinition, Source, SourceType};
use crate::output::Outputs;
use crate::variables::HostVariables;

/// A backend that executes one family of source types.
///
/// Backends are offered every selected source in turn. A backend that claims a
/// source takes responsibility for it; one that refuses must leave no trace.
pub trait AbstractCollector {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Returns true when the source was claimed by this backend.
    fn register_source(
        &mut self,
        definition: &ArtifactDefinition,
        source: &Source,
        variables: &HostVariables,
    ) -> bool;

    /// Runs everything registered so far. Failures are logged, never raised.
    fn collect(&mut self, output: &mut Outputs);
}

/// Name of the running platform as used by `supported_os`, if it is one the
/// collector knows.
pub fn current_platform() -> Option<&'static str> {
    if cfg!(target_os = "windows") {
        Some("Windows")
    } else if cfg!(target_os = "macos") {
        Some("Darwin")
    } else if cfg!(target_os = "linux") {
        Some("Linux")
    } else {
        None
    }
}

/// Dispatches sources to the backends and drives the collection.
pub struct Collector {
    platform: String,
    variables: HostVariables,
    sources: usize,
    collectors: Vec<Box<dyn AbstractCollector>>,
}

impl Collector {
    /// A dispatcher with no backends.
    pub fn new(platform: &str, variables: HostVariables) -> Self {
        Self {
            platform: platform.to_string(),
            variables,
            sources: 0,
            collectors: Vec::new(),
        }
    }

    /// A dispatcher with the command, filesystem, registry and WMI backends.
    ///
    /// With `image`, files are read from that NTFS image instead of the mounted
    /// volumes.
    pub fn with_default_collectors(
        platform: &str,
        variables: HostVariables,
        image: Option<PathBuf>,
    ) -> Result<Self> {
        let files = match image {
            Some(image) => FileSystemManager::with_image(&image)?,
            None => FileSystemManager::new(),
        };

        let mut collector = Self::new(platform, variables);
        collector.add_collector(Box::new(CommandExecutor::new()));
        collector.add_collector(Box::new(files));
        collector.add_collector(Box::new(RegistryCollector::new()));
        collector.add_collector(Box::new(WmiExecutor::new()));
        Ok(collector)
    }

    pub fn add_collector(&mut self, collector: Box<dyn AbstractCollector>) {
        debug!("Adding {} collector", collector.name());
        self.collectors.push(collector);
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn variables(&self) -> &HostVariables {
        &self.variables
    }

    /// Number of sources claimed by a backend.
    pub fn sources(&self) -> usize {
        self.sources
    }

    /// Offers `source` to the backends in order until one claims it.
    pub fn register_source(&mut self, definition: &ArtifactDefinition, source: &Source) -> bool {
        if !definition.supports(&self.platform) || !source.supports(&self.platform) {
            warn!(
                "Skipping source for '{}' as it is not supported on {}",
                definition.name, self.platform
            );
            return false;
        }

        for collector in self.collectors.iter_mut() {
            if collector.register_source(definition, source, &self.variables) {
                debug!("Source for '{}' claimed by {}", definition.name, collector.name());
                self.sources += 1;
                return true;
            }
        }

        if !matches!(source.source_type, SourceType::ArtifactGroup(_)) {
            warn!(
                "Cannot process source for '{}' because type '{}' is not supported",
                definition.name,
                source.type_indicator()
            );
        }
        false
    }

    /// Registers every source of `definition`. Returns the number claimed.
    pub fn register_definition(&mut self, definition: &ArtifactDefinition) -> usize {
        definition
            .sources
            .iter()
            .filter(|source| self.register_source(definition, source))
            .count()
    }

    /// Runs every backend, then closes `output`.
    pub fn collect(&mut self, output: &mut Outputs) -> Result<()> {
        info!("Collecting artifacts from {} sources ...", self.sources);
        for collector in self.collectors.iter_mut() {
            debug!("Running {} collector", collector.name());
            collector.collect(output);
        }
        info!("Finished collecting artifacts");
        output.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactGroupSourceType, CommandSourceType, WmiQuerySourceType};
    use crate::test_utils::create_temp_dir;
    use std::sync::{Arc, Mutex};

    /// Claims COMMAND sources and remembers the artifacts it saw.
    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl AbstractCollector for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn register_source(&mut self, definition: &ArtifactDefinition, source: &Source, _: &HostVariables) -> bool {
            if !matches!(source.source_type, SourceType::Command(_)) {
                return false;
            }
            self.seen.lock().unwrap().push(definition.name.clone());
            true
        }

        fn collect(&mut self, output: &mut Outputs) {
            for name in self.seen.lock().unwrap().iter() {
                output.add_collected_command(name, "recorded", "ok");
            }
        }
    }

    fn command() -> Source {
        Source::new(SourceType::Command(CommandSourceType {
            cmd: "echo".to_string(),
            args: vec!["test".to_string()],
        }))
    }

    #[test]
    fn test_dispatch_counts_claimed_sources() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut collector = Collector::new("Linux", HostVariables::default());
        collector.add_collector(Box::new(Recording { seen: seen.clone() }));

        let definition = ArtifactDefinition::new("TestArtifact", "");
        assert!(collector.register_source(&definition, &command()));

        let wmi = Source::new(SourceType::Wmi(WmiQuerySourceType {
            query: "SELECT * FROM Win32_Process".to_string(),
            base_object: None,
        }));
        assert!(!collector.register_source(&definition, &wmi));

        let group = Source::new(SourceType::ArtifactGroup(ArtifactGroupSourceType {
            names: vec!["Other".to_string()],
        }));
        assert!(!collector.register_source(&definition, &group));

        assert_eq!(collector.sources(), 1);
        assert_eq!(seen.lock().unwrap().as_slice(), ["TestArtifact"]);
    }

    #[test]
    fn test_unsupported_platform_is_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut collector = Collector::new("Linux", HostVariables::default());
        collector.add_collector(Box::new(Recording { seen: seen.clone() }));

        let mut source = command();
        source.supported_os = vec!["Windows".to_string()];
        let definition = ArtifactDefinition::new("WindowsOnly", "");

        assert!(!collector.register_source(&definition, &source));
        assert_eq!(collector.sources(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_collect_closes_output() -> anyhow::Result<()> {
        let dir = create_temp_dir()?;
        let mut outputs = Outputs::new(dir.path(), 0, false)?;
        let mut collector = Collector::new("Linux", HostVariables::default());
        collector.add_collector(Box::new(Recording {
            seen: Arc::new(Mutex::new(Vec::new())),
        }));

        let mut definition = ArtifactDefinition::new("TestArtifact", "");
        definition.sources.push(command());
        assert_eq!(collector.register_definition(&definition), 1);

        collector.collect(&mut outputs)?;
        let commands = std::fs::read_to_string(outputs.output_path("commands.json"))?;
        assert!(commands.contains("recorded"));
        Ok(())
    }

    #[test]
    fn test_current_platform() {
        let platform = current_platform().unwrap();
        assert!(["Windows", "Linux", "Darwin"].contains(&platform));
    }
}
