use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::size::parse_human_size;
use crate::cli::Args;
use crate::constants::DEFAULT_SETTINGS_FILE;

/// Settings of a collection run.
///
/// Read from a YAML file; every key is optional. Command line flags take
/// precedence over the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Artifacts to collect, comma separated
    pub include: String,
    /// Artifacts to skip, comma separated
    pub exclude: String,
    /// Directories holding definition files, comma separated
    pub directory: String,
    /// Collect registry sources
    pub registry: bool,
    /// Skip files larger than this (`50M`, `1G`)
    pub maxsize: String,
    pub output: String,
    /// API key of the reputation service
    pub apikey: String,
    /// Log a SHA-256 for every archived file
    pub sha256: bool,
    /// Look up collected executables in the reputation service
    pub analysis: bool,
    /// Raw NTFS image to read files from
    pub image: Option<PathBuf>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            include: String::new(),
            exclude: String::new(),
            directory: String::new(),
            registry: false,
            maxsize: String::new(),
            output: ".".to_string(),
            apikey: String::new(),
            sha256: false,
            analysis: false,
            image: None,
        }
    }
}

impl CollectorSettings {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Loads `path`, or `artifacts.yaml` from the working directory when no
    /// path is given. Only the default file may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            info!("Loading settings from {}", path.display());
            return Self::from_yaml_file(path);
        }

        let default_path = std::env::current_dir()
            .context("Failed to get working directory")?
            .join(DEFAULT_SETTINGS_FILE);
        if default_path.exists() {
            info!("Loading settings from {}", default_path.display());
            Self::from_yaml_file(&default_path)
        } else {
            debug!("No settings file at {}, using defaults", default_path.display());
            Ok(Self::default())
        }
    }

    /// Overrides settings with the flags given on the command line.
    pub fn merge_args(&mut self, args: &Args) {
        let overrides = [
            (&mut self.include, &args.include),
            (&mut self.exclude, &args.exclude),
            (&mut self.directory, &args.directory),
            (&mut self.maxsize, &args.maxsize),
            (&mut self.output, &args.output),
            (&mut self.apikey, &args.apikey),
        ];
        for (setting, flag) in overrides {
            if let Some(value) = flag {
                *setting = value.clone();
            }
        }

        self.registry |= args.registry;
        self.sha256 |= args.sha256;
        self.analysis |= args.analysis;
        if args.image.is_some() {
            self.image = args.image.clone();
        }
    }

    pub fn include_names(&self) -> Vec<String> {
        split_list(&self.include)
    }

    pub fn exclude_names(&self) -> Vec<String> {
        split_list(&self.exclude)
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        split_list(&self.directory).into_iter().map(PathBuf::from).collect()
    }

    pub fn maxsize_bytes(&self) -> Result<u64> {
        parse_human_size(&self.maxsize).context("Invalid maxsize setting")
    }
}

/// Splits a comma separated list, dropping blank items.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
