//! Output sink of a collection run.
//!
//! Everything collected ends up in one directory named after the start time
//! and the hostname:
//!
//! | file | content |
//! |---|---|
//! | `<host>-files.zip` | collected files, paths without drive colon |
//! | `<host>-file_info.jsonl` | one [`FileInfo`] record per line |
//! | `<host>-commands.json` | artifact → command → output |
//! | `<host>-wmi.json` | artifact → query → result rows |
//! | `<host>-registry.json` | artifact → key → value name → `{value, type}` |
//! | `<host>-logs.txt` | copy of the console log |
//! | `<host>-analyse.jsonl` | reputation lookups, when enabled |
//!
//! Files are only created once something is written to them.

use std::collections::BTreeMap;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::analysis::AnalysisQueue;
use crate::constants::{ANALYSIS_EXTENSIONS, OUTPUT_DIR_ENV, OUTPUT_DIR_TIME_FORMAT, PE_MIME_TYPES};
use crate::filesystem::{PathFileSystem, PathObject, RegistryValue};
use crate::utils::compress::ArchiveWriter;

pub mod file_info;
pub mod pe;

pub use self::file_info::FileInfo;
pub use self::pe::PeMetadata;

pub struct Outputs {
    dirpath: PathBuf,
    hostname: String,
    maxsize: u64,
    sha256: bool,

    archive: ArchiveWriter,
    file_info: Option<BufWriter<File>>,

    commands: BTreeMap<String, BTreeMap<String, String>>,
    wmi: BTreeMap<String, BTreeMap<String, Value>>,
    registry: BTreeMap<String, BTreeMap<String, BTreeMap<String, RegistryValue>>>,

    analysis: Option<AnalysisQueue>,
}

impl Outputs {
    /// Creates the run directory below `output_dir` and exports its path in
    /// `FAOUTPUTDIR` for commands that write their own files.
    pub fn new(output_dir: &Path, maxsize: u64, sha256: bool) -> Result<Self> {
        let hostname = hostname::get()
            .map_err(|e| anyhow!("Failed to get hostname: {}", e))?
            .to_string_lossy()
            .to_string();
        let now = chrono::Local::now().format(OUTPUT_DIR_TIME_FORMAT);
        let dirpath = output_dir.join(format!("{}-{}", now, hostname));

        create_private_dir(&dirpath)
            .with_context(|| format!("Failed to create output directory {}", dirpath.display()))?;
        env::set_var(OUTPUT_DIR_ENV, &dirpath);
        info!("Output directory created at {}", dirpath.display());

        let archive = ArchiveWriter::new(dirpath.join(format!("{}-files.zip", hostname)));
        Ok(Self {
            dirpath,
            hostname,
            maxsize,
            sha256,
            archive,
            file_info: None,
            commands: BTreeMap::new(),
            wmi: BTreeMap::new(),
            registry: BTreeMap::new(),
            analysis: None,
        })
    }

    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// `<dirpath>/<hostname>-<suffix>`
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.dirpath.join(format!("{}-{}", self.hostname, suffix))
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_path("logs.txt")
    }

    pub fn analysis_path(&self) -> PathBuf {
        self.output_path("analyse.jsonl")
    }

    /// Forwards PE file info records to `queue` from now on.
    pub fn set_analysis_queue(&mut self, queue: AnalysisQueue) {
        self.analysis = Some(queue);
    }

    fn exceeds_maxsize(&self, size: u64) -> bool {
        self.maxsize > 0 && size > self.maxsize
    }

    /// Stores the content of `path` in the archive.
    pub fn add_collected_file<F: PathFileSystem>(
        &mut self,
        artifact: &str,
        fs: &F,
        path: &PathObject<F::Handle>,
    ) -> Result<()> {
        if !fs.is_file(path) {
            debug!("File not found: {}", path.path);
            return Ok(());
        }
        let size = fs.size(path);
        if self.exceeds_maxsize(size) {
            warn!(
                "Skipping file '{}' ({} bytes) for artifact '{}': larger than maxsize {}",
                path.path, size, artifact, self.maxsize
            );
            return Ok(());
        }

        let filename = normalize_filepath(&path.path);
        if self.archive.contains(&filename) {
            return Ok(());
        }

        let chunks = fs
            .read_chunks(path)
            .with_context(|| format!("Failed to open {}", path.path))?;
        let sha256 = self.archive.add_entry(&filename, size, chunks, self.sha256)?;
        match sha256 {
            Some(sha256) => info!("Added {} ({} bytes, sha256 {}) to archive", filename, size, sha256),
            None => info!("Added {} ({} bytes) to archive", filename, size),
        }
        Ok(())
    }

    /// Appends a [`FileInfo`] record for `path` and queues executables for
    /// analysis.
    pub fn add_collected_file_info<F: PathFileSystem>(
        &mut self,
        artifact: &str,
        fs: &F,
        path: &PathObject<F::Handle>,
    ) -> Result<()> {
        let size = fs.size(path);
        if self.exceeds_maxsize(size) {
            warn!(
                "Skipping file info of '{}' ({} bytes) for artifact '{}': larger than maxsize {}",
                path.path, size, artifact, self.maxsize
            );
            return Ok(());
        }

        let chunks = fs
            .read_chunks(path)
            .with_context(|| format!("Failed to open {}", path.path))?;
        let info = FileInfo::compute(&path.path, size, chunks)
            .with_context(|| format!("Failed to compute file info for {}", path.path))?
            .with_artifact(artifact);
        self.write_file_info(&info)?;

        if let Some(queue) = &self.analysis {
            let extension = Path::new(&info.file.path)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            debug!(
                "Analyzing candidate: path={}, mime={}, ext={}",
                info.file.path, info.file.mime_type, extension
            );
            if PE_MIME_TYPES.contains(&info.file.mime_type.as_str())
                || ANALYSIS_EXTENSIONS.contains(&extension.as_str())
            {
                queue.enqueue(serde_json::to_value(&info)?);
            }
        }
        Ok(())
    }

    fn write_file_info(&mut self, info: &FileInfo) -> Result<()> {
        let writer = match &mut self.file_info {
            Some(writer) => writer,
            slot @ None => {
                let path = self.dirpath.join(format!("{}-file_info.jsonl", self.hostname));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                slot.insert(BufWriter::new(file))
            }
        };
        serde_json::to_writer(&mut *writer, info)?;
        writeln!(writer)?;
        Ok(())
    }

    pub fn add_collected_command(&mut self, artifact: &str, command: &str, output: &str) {
        info!("Collecting command '{}' for artifact '{}'", command, artifact);
        self.commands
            .entry(artifact.to_string())
            .or_default()
            .insert(command.to_string(), output.to_string());
    }

    pub fn add_collected_wmi(&mut self, artifact: &str, query: &str, output: Value) {
        info!("Collecting WMI query '{}' for artifact '{}'", query, artifact);
        self.wmi
            .entry(artifact.to_string())
            .or_default()
            .insert(query.to_string(), output);
    }

    pub fn add_collected_registry_value(
        &mut self,
        artifact: &str,
        key: &str,
        name: &str,
        value: Value,
        value_type: &str,
    ) {
        info!("Collecting Reg value '{}' from '{}' for artifact '{}'", name, key, artifact);
        self.registry
            .entry(artifact.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), RegistryValue::new(name, value, value_type));
    }

    /// Finishes every output file.
    ///
    /// All steps run even when one fails; the returned error lists each failure.
    pub fn close(&mut self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = self.archive.finish() {
            errors.push(format!("{:#}", e));
        }

        let commands = self.output_path("commands.json");
        let wmi = self.output_path("wmi.json");
        let registry = self.output_path("registry.json");
        for result in [
            write_json(&commands, &self.commands),
            write_json(&wmi, &self.wmi),
            write_json(&registry, &self.registry),
        ] {
            if let Err(e) = result {
                errors.push(format!("{:#}", e));
            }
        }

        if let Some(mut writer) = self.file_info.take() {
            if let Err(e) = writer.flush() {
                errors.push(format!("Failed to flush file info: {}", e));
            }
        }
        if let Some(mut queue) = self.analysis.take() {
            if let Err(e) = queue.close() {
                errors.push(format!("{:#}", e));
            }
        }
        log::logger().flush();

        if !errors.is_empty() {
            bail!("Failed to close outputs: {}", errors.join("; "));
        }
        Ok(())
    }
}

/// Writes `value` as pretty JSON unless it is an empty map.
fn write_json<K, V>(path: &Path, value: &BTreeMap<K, V>) -> Result<()>
where
    K: Serialize + Ord,
    V: Serialize,
{
    if value.is_empty() {
        return Ok(());
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

/// Archive entry name of a collected path.
///
/// `C:\Windows\x` becomes `C/Windows/x` and `/etc/passwd` becomes `etc/passwd`.
pub fn normalize_filepath(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    if let (Some(colon), Some(separator)) = (normalized.find(':'), normalized.find('/')) {
        if separator > 0 && colon < separator {
            normalized.remove(colon);
        }
    }
    normalized.trim_start_matches('/').to_string()
}
