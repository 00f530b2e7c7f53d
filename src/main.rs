use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};

use artifact_collector::analysis::{AnalysisConfig, AnalysisQueue, OpenTipClient};
use artifact_collector::artifacts::{ArtifactDefinitionsRegistry, ArtifactsReader};
use artifact_collector::cli::Args;
use artifact_collector::collectors::{current_platform, Collector};
use artifact_collector::config::{resolve_artifact_groups, CollectorSettings, Selection};
use artifact_collector::constants::DEFINITIONS_DIR;
use artifact_collector::logging;
use artifact_collector::output::Outputs;
use artifact_collector::variables::HostVariables;

fn main() -> Result<()> {
    // Parse arguments and merge them over the settings file
    let args = Args::parse();
    let settings = load_settings(&args)?;

    let platform = current_platform().ok_or_else(|| anyhow!("Unsupported platform: {}", env::consts::OS))?;

    // The run directory must exist before the log file can be opened
    let maxsize = settings.maxsize_bytes()?;
    let mut outputs = Outputs::new(Path::new(&settings.output), maxsize, settings.sha256)?;
    logging::init(args.verbose, Some(&outputs.log_path()))?;
    info!("Starting artifact collection on {}", platform);
    info!("Output directory: {}", outputs.dirpath().display());

    if settings.analysis {
        attach_analysis(&settings, &mut outputs);
    }

    let registry = load_definitions(&settings)?;
    let selection = Selection {
        include: resolve_artifact_groups(&registry, &settings.include_names()),
        exclude: resolve_artifact_groups(&registry, &settings.exclude_names()),
        platform: platform.to_string(),
        registry: settings.registry,
    };

    let variables = HostVariables::for_platform(platform);
    let mut collector = Collector::with_default_collectors(platform, variables, settings.image.clone())?;

    let definitions = registry.get_definitions();
    for (definition, source) in selection.select(&definitions) {
        collector.register_source(definition, source);
    }

    collector.collect(&mut outputs)?;
    info!("Collection complete, results in {}", outputs.dirpath().display());
    Ok(())
}

fn load_settings(args: &Args) -> Result<CollectorSettings> {
    let mut settings = CollectorSettings::load(args.config.as_deref())?;
    settings.merge_args(args);
    Ok(settings)
}

/// Starts the reputation lookups. Failing to do so only disables analysis.
fn attach_analysis(settings: &CollectorSettings, outputs: &mut Outputs) {
    let client = match OpenTipClient::new(&settings.apikey) {
        Ok(client) => client,
        Err(e) => {
            warn!("Analysis disabled: {}", e);
            return;
        }
    };
    match AnalysisQueue::new(Arc::new(client), AnalysisConfig::default(), &outputs.analysis_path()) {
        Ok(queue) => {
            info!("Analysis of collected executables enabled");
            outputs.set_analysis_queue(queue);
        }
        Err(e) => warn!("Analysis disabled: {:#}", e),
    }
}

/// Reads definitions from the configured directories, or from the `data`
/// directory next to the executable.
fn load_definitions(settings: &CollectorSettings) -> Result<ArtifactDefinitionsRegistry> {
    let mut directories = settings.directories();
    if directories.is_empty() {
        directories.push(default_definitions_dir()?);
    }

    let reader = ArtifactsReader::default();
    let mut registry = ArtifactDefinitionsRegistry::new();
    for directory in &directories {
        match registry.read_from_directory(&reader, directory, Some("yaml")) {
            Ok(count) => info!("Loaded {} artifact definitions from {}", count, directory.display()),
            Err(e) => warn!("Failed to read artifact definitions from {}: {:#}", directory.display(), e),
        }
    }

    for name in registry.get_undefined_artifacts() {
        warn!("Artifact group references undefined artifact '{}'", name);
    }
    Ok(registry)
}

fn default_definitions_dir() -> Result<PathBuf> {
    let exe = env::current_exe().context("Failed to get executable path")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow!("Executable has no parent directory"))?;
    Ok(dir.join(DEFINITIONS_DIR))
}
