use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments of the collector.
///
/// Every option can also be set in the settings file; flags given here win.
#[derive(Parser, Debug, Default)]
#[clap(
    name = "artifact_collector",
    version,
    about = "Collects forensic artifacts described by ForensicArtifacts definitions"
)]
pub struct Args {
    /// Path to a YAML settings file (default: ./artifacts.yaml if present)
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Artifacts to collect, comma separated (default: all)
    #[clap(long)]
    pub include: Option<String>,

    /// Artifacts to skip, comma separated
    #[clap(long)]
    pub exclude: Option<String>,

    /// Directories with artifact definitions, comma separated (default: <exe dir>/data)
    #[clap(long)]
    pub directory: Option<String>,

    /// Collect registry sources
    #[clap(long)]
    pub registry: bool,

    /// Skip files larger than this size (e.g. 500K, 50M, 1G)
    #[clap(long)]
    pub maxsize: Option<String>,

    /// Directory in which the run directory is created
    #[clap(short, long)]
    pub output: Option<String>,

    /// API key for hash reputation lookups
    #[clap(long)]
    pub apikey: Option<String>,

    /// Log the SHA-256 of every archived file
    #[clap(long)]
    pub sha256: bool,

    /// Look up collected executables in the reputation service
    #[clap(long)]
    pub analysis: bool,

    /// Read files from a raw NTFS image instead of the live volumes
    #[clap(long)]
    pub image: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}
