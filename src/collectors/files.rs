use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use sysinfo::{DiskExt, System, SystemExt};

use super::collector::AbstractCollector;
use crate::artifacts::{ArtifactDefinition, Source, SourceType};
use crate::filesystem::pipeline::resolve;
use crate::filesystem::{NtfsFileSystem, OsFileSystem, PathFileSystem};
use crate::output::Outputs;
use crate::variables::HostVariables;

/// Key of the volume opened from a disk image.
const IMAGE_VOLUME: &str = "image";

/// A mounted volume of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Where the volume is mounted (`/`, `/home`, `C:\`)
    pub path: String,
    /// Filesystem type as reported by the OS (`ext4`, `NTFS`)
    pub filesystem: String,
    /// Block device backing the volume, empty when unknown
    pub device: String,
}

impl MountPoint {
    pub fn new(path: &str, filesystem: &str, device: &str) -> Self {
        Self {
            path: path.to_string(),
            filesystem: filesystem.to_string(),
            device: device.to_string(),
        }
    }

    pub fn is_ntfs(&self) -> bool {
        self.filesystem.eq_ignore_ascii_case("ntfs")
    }

    /// Mount path with forward slashes and no trailing separator.
    fn prefix(&self) -> String {
        self.path.replace('\\', "/").trim_end_matches('/').to_string()
    }

    fn raw_device(&self) -> String {
        if cfg!(target_os = "windows") {
            format!(r"\\.\{}", self.path.trim_end_matches('\\'))
        } else {
            self.device.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileAction {
    Collect,
    Info,
}

#[derive(Debug, Clone)]
struct FilePattern {
    artifact: String,
    pattern: String,
    action: FileAction,
}

enum Volume {
    Os(OsFileSystem),
    Ntfs(Box<NtfsFileSystem>),
}

struct MountedVolume {
    volume: Volume,
    patterns: Vec<FilePattern>,
}

/// Routes FILE, FILE_INFO, PATH and DIRECTORY sources to the volume holding
/// them and collects the matching files.
///
/// NTFS volumes are read raw when the device can be opened, which gets past
/// files locked by the running system; otherwise the OS filesystem is used.
pub struct FileSystemManager {
    // longest mount path first
    mount_points: Vec<MountPoint>,
    image: Option<MountedVolume>,
    volumes: BTreeMap<String, MountedVolume>,
}

impl Default for FileSystemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemManager {
    /// Uses the volumes currently mounted on the host.
    pub fn new() -> Self {
        Self::with_mount_points(discover_mount_points())
    }

    pub fn with_mount_points(mut mount_points: Vec<MountPoint>) -> Self {
        mount_points.sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));
        debug!("Mount points: {:?}", mount_points);
        Self {
            mount_points,
            image: None,
            volumes: BTreeMap::new(),
        }
    }

    /// Reads every file pattern from the NTFS image at `path` instead of the
    /// host volumes.
    pub fn with_image(path: &Path) -> Result<Self> {
        let fs = NtfsFileSystem::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?;
        info!("Reading files from image {}", path.display());

        let mut manager = Self::with_mount_points(Vec::new());
        manager.image = Some(MountedVolume {
            volume: Volume::Ntfs(Box::new(fs)),
            patterns: Vec::new(),
        });
        Ok(manager)
    }

    pub fn mount_points(&self) -> &[MountPoint] {
        &self.mount_points
    }

    /// Registered patterns as (volume, pattern relative to the volume root).
    pub fn patterns(&self) -> Vec<(String, String)> {
        let image = self
            .image
            .iter()
            .flat_map(|v| v.patterns.iter().map(|p| (IMAGE_VOLUME.to_string(), p.pattern.clone())));
        let volumes = self
            .volumes
            .iter()
            .flat_map(|(key, v)| v.patterns.iter().map(move |p| (key.clone(), p.pattern.clone())));
        image.chain(volumes).collect()
    }

    /// Splits an absolute pattern into the mount point holding it and the
    /// remaining relative pattern.
    ///
    /// A pattern starting with a backslash has no drive and applies to every
    /// NTFS volume.
    fn route(&self, pattern: &str) -> Vec<(MountPoint, String)> {
        if pattern.starts_with('\\') {
            let relative = pattern.replace('\\', "/").trim_start_matches('/').to_string();
            return self
                .mount_points
                .iter()
                .filter(|mount| mount.is_ntfs())
                .map(|mount| (mount.clone(), relative.clone()))
                .collect();
        }

        let normalized = pattern.replace('\\', "/");
        for mount in &self.mount_points {
            let prefix = mount.prefix();
            if let Some(rest) = strip_mount_prefix(&normalized, &prefix) {
                return vec![(mount.clone(), rest.trim_start_matches('/').to_string())];
            }
        }

        if normalized.starts_with('/') {
            let root = MountPoint::new("/", "", "");
            return vec![(root, normalized.trim_start_matches('/').to_string())];
        }
        Vec::new()
    }

    fn add_pattern(&mut self, artifact: &str, pattern: &str, action: FileAction) {
        let entry = |pattern: String| FilePattern {
            artifact: artifact.to_string(),
            pattern,
            action,
        };

        if let Some(image) = self.image.as_mut() {
            let relative = strip_drive(&pattern.replace('\\', "/"));
            image.patterns.push(entry(relative));
            return;
        }

        let routes = self.route(pattern);
        if routes.is_empty() {
            warn!("No volume found for pattern '{}' of artifact '{}'", pattern, artifact);
        }
        for (mount, relative) in routes {
            debug!("Pattern '{}' routed to {} as '{}'", pattern, mount.path, relative);
            self.volumes
                .entry(mount.path.clone())
                .or_insert_with(|| MountedVolume {
                    volume: open_volume(&mount),
                    patterns: Vec::new(),
                })
                .patterns
                .push(entry(relative));
        }
    }
}

impl AbstractCollector for FileSystemManager {
    fn name(&self) -> &'static str {
        "files"
    }

    fn register_source(
        &mut self,
        definition: &ArtifactDefinition,
        source: &Source,
        variables: &HostVariables,
    ) -> bool {
        let (paths, action, recursive) = match &source.source_type {
            SourceType::File(paths) => (paths, FileAction::Collect, false),
            SourceType::FileInfo(paths) => (paths, FileAction::Info, false),
            SourceType::Path(paths) | SourceType::Directory(paths) => (paths, FileAction::Collect, true),
            _ => return false,
        };

        for path in &paths.paths {
            for mut pattern in variables.substitute(path) {
                if recursive && !pattern.ends_with('*') {
                    pattern.push_str(if paths.separator == "\\" { "\\**-1" } else { "/**-1" });
                }
                self.add_pattern(&definition.name, &pattern, action);
            }
        }
        true
    }

    fn collect(&mut self, output: &mut Outputs) {
        let volumes = self.image.iter().chain(self.volumes.values());
        for mounted in volumes {
            for pattern in &mounted.patterns {
                match &mounted.volume {
                    Volume::Os(fs) => collect_pattern(fs, pattern, output),
                    Volume::Ntfs(fs) => collect_pattern(fs.as_ref(), pattern, output),
                }
            }
        }
    }
}

fn collect_pattern<F: PathFileSystem>(fs: &F, pattern: &FilePattern, output: &mut Outputs) {
    debug!("Resolving '{}' for artifact '{}'", pattern.pattern, pattern.artifact);
    for path in resolve(fs, &pattern.pattern, false) {
        let result = match pattern.action {
            FileAction::Collect => output.add_collected_file(&pattern.artifact, fs, &path),
            FileAction::Info => output.add_collected_file_info(&pattern.artifact, fs, &path),
        };
        if let Err(e) = result {
            warn!(
                "Failed to collect '{}' for artifact '{}': {:#}",
                path.path, pattern.artifact, e
            );
        }
    }
}

fn open_volume(mount: &MountPoint) -> Volume {
    if mount.is_ntfs() {
        let device = mount.raw_device();
        match NtfsFileSystem::open(&device) {
            Ok(fs) => {
                info!("Reading {} from raw NTFS device {}", mount.path, device);
                return Volume::Ntfs(Box::new(fs.with_prefix(&mount.path)));
            }
            Err(e) => debug!("Falling back to OS access for {}: {:#}", mount.path, e),
        }
    }
    Volume::Os(OsFileSystem::new(PathBuf::from(&mount.path)))
}

fn discover_mount_points() -> Vec<MountPoint> {
    let mut system = System::new();
    system.refresh_disks_list();
    system
        .disks()
        .iter()
        .map(|disk| MountPoint {
            path: disk.mount_point().to_string_lossy().to_string(),
            filesystem: String::from_utf8_lossy(disk.file_system()).to_string(),
            device: disk.name().to_string_lossy().to_string(),
        })
        .collect()
}

/// The part of `pattern` below `prefix`, if `prefix` is a whole-component
/// prefix of it.
fn strip_mount_prefix<'a>(pattern: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return pattern.starts_with('/').then_some(pattern);
    }
    if pattern.len() < prefix.len() || !pattern.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = pattern.split_at(prefix.len());
    let matches = if cfg!(target_os = "windows") || prefix.ends_with(':') {
        head.eq_ignore_ascii_case(prefix)
    } else {
        head == prefix
    };
    (matches && (rest.is_empty() || rest.starts_with('/'))).then_some(rest)
}

/// `C:/Windows` → `Windows`
fn strip_drive(pattern: &str) -> String {
    let bytes = pattern.as_bytes();
    let rest = if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        &pattern[2..]
    } else {
        pattern
    };
    rest.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::PathsSourceType;
    use crate::test_utils::{create_pattern_tree, create_temp_dir};
    use std::fs::File;

    fn paths(paths: &[&str]) -> PathsSourceType {
        PathsSourceType {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            separator: "/".to_string(),
        }
    }

    #[test]
    fn test_longest_mount_point_wins() {
        let manager = FileSystemManager::with_mount_points(vec![
            MountPoint::new("/", "ext4", "/dev/sda1"),
            MountPoint::new("/mnt/data", "xfs", "/dev/sdb1"),
        ]);

        let route = manager.route("/mnt/data/logs/*.log");
        assert_eq!(route.len(), 1);
        assert_eq!(route[0].0.path, "/mnt/data");
        assert_eq!(route[0].1, "logs/*.log");

        let route = manager.route("/mnt/database/x");
        assert_eq!(route[0].0.path, "/");
        assert_eq!(route[0].1, "mnt/database/x");
    }

    #[test]
    fn test_drive_letter_routing() {
        let manager = FileSystemManager::with_mount_points(vec![
            MountPoint::new("C:\\", "NTFS", ""),
            MountPoint::new("D:\\", "NTFS", ""),
            MountPoint::new("E:\\", "FAT32", ""),
        ]);

        let route = manager.route(r"c:\Windows\System32\config\SAM");
        assert_eq!(route.len(), 1);
        assert_eq!(route[0].0.path, "C:\\");
        assert_eq!(route[0].1, "Windows/System32/config/SAM");

        let route = manager.route(r"\$MFT");
        let mounts: Vec<&str> = route.iter().map(|(m, _)| m.path.as_str()).collect();
        assert_eq!(mounts, vec!["C:\\", "D:\\"]);
        assert!(route.iter().all(|(_, p)| p == "$MFT"));
    }

    #[test]
    fn test_strip_drive() {
        assert_eq!(strip_drive("C:/Windows/System32"), "Windows/System32");
        assert_eq!(strip_drive("/Windows"), "Windows");
        assert_eq!(strip_drive("Windows"), "Windows");
    }

    #[test]
    fn test_directory_sources_recurse() -> anyhow::Result<()> {
        let tree = create_pattern_tree()?;
        let root = tree.path().to_string_lossy().to_string();
        let mut manager =
            FileSystemManager::with_mount_points(vec![MountPoint::new(&root, "ext4", "")]);
        let definition = ArtifactDefinition::new("Tree", "");
        let variables = HostVariables::default();

        let directory = Source::new(SourceType::Directory(paths(&[&format!("{}/l1/l2", root)])));
        let glob = Source::new(SourceType::Path(paths(&[&format!("{}/l1/*", root)])));
        assert!(manager.register_source(&definition, &directory, &variables));
        assert!(manager.register_source(&definition, &glob, &variables));

        let patterns: Vec<String> = manager.patterns().into_iter().map(|(_, p)| p).collect();
        assert_eq!(patterns, vec!["l1/l2/**-1".to_string(), "l1/*".to_string()]);
        Ok(())
    }

    #[test]
    fn test_collect_files_and_info() -> anyhow::Result<()> {
        let tree = create_pattern_tree()?;
        let root = tree.path().to_string_lossy().to_string();
        let mut manager =
            FileSystemManager::with_mount_points(vec![MountPoint::new(&root, "ext4", "")]);
        let definition = ArtifactDefinition::new("Tree", "");
        let variables = HostVariables::default();

        let files = Source::new(SourceType::File(paths(&[&format!("{}/root*.txt", root)])));
        let info = Source::new(SourceType::FileInfo(paths(&[&format!("{}/l1/l1.txt", root)])));
        let deep = Source::new(SourceType::Directory(paths(&[&format!("{}/l1/l2/l3", root)])));
        for source in [&files, &info, &deep] {
            assert!(manager.register_source(&definition, source, &variables));
        }
        let command = Source::new(SourceType::Command(crate::artifacts::CommandSourceType {
            cmd: "echo".to_string(),
            args: vec!["x".to_string()],
        }));
        assert!(!manager.register_source(&definition, &command, &variables));

        let out = create_temp_dir()?;
        let mut outputs = Outputs::new(out.path(), 0, false)?;
        manager.collect(&mut outputs);
        outputs.close()?;

        let archive = zip::ZipArchive::new(File::open(outputs.output_path("files.zip"))?)?;
        let mut names: Vec<String> = archive
            .file_names()
            .map(|name| name.rsplit('/').next().unwrap_or(name).to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["l3.txt", "l4.txt", "l5.txt", "root.txt", "root2.txt"]);

        let info = std::fs::read_to_string(outputs.output_path("file_info.jsonl"))?;
        assert_eq!(info.lines().count(), 1);
        assert!(info.contains("l1.txt"));
        Ok(())
    }

    #[test]
    fn test_missing_image_is_an_error() {
        assert!(FileSystemManager::with_image(Path::new("/nonexistent/disk.img")).is_err());
    }

    #[test]
    fn test_image_patterns_drop_the_drive() -> anyhow::Result<()> {
        let image = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_ntfs.img");
        let mut manager = FileSystemManager::with_image(&image)?;
        manager.add_pattern("Docs", r"C:\Docs\*.txt", FileAction::Collect);
        manager.add_pattern("Readme", "/Readme.TXT", FileAction::Info);

        assert_eq!(
            manager.patterns(),
            vec![
                ("image".to_string(), "Docs/*.txt".to_string()),
                ("image".to_string(), "Readme.TXT".to_string()),
            ]
        );
        Ok(())
    }
}
