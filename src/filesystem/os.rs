use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::{Chunks, PathFileSystem, PathObject};
use crate::constants::READ_CHUNK_SIZE;

/// The live filesystem below a mount point.
#[derive(Debug, Clone)]
pub struct OsFileSystem {
    root: PathBuf,
}

impl OsFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Makes an absolute pattern relative to the root of this filesystem.
    pub fn strip_root(&self, pattern: &str) -> String {
        let root = to_slash(&self.root.to_string_lossy());
        let pattern = to_slash(pattern);
        let root_trimmed = root.trim_end_matches('/');

        let relative = if root_trimmed.is_empty() {
            pattern.as_str()
        } else if starts_with_ignore_case(&pattern, root_trimmed) {
            &pattern[root_trimmed.len()..]
        } else {
            pattern.as_str()
        };
        relative.trim_start_matches('/').to_string()
    }
}

fn to_slash(path: &str) -> String {
    if cfg!(target_os = "windows") {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    if cfg!(target_os = "windows") {
        text.len() >= prefix.len()
            && text.is_char_boundary(prefix.len())
            && text[..prefix.len()].eq_ignore_ascii_case(prefix)
    } else {
        text.starts_with(prefix)
    }
}

impl PathFileSystem for OsFileSystem {
    type Handle = PathBuf;

    fn root(&self) -> Option<PathObject<PathBuf>> {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Some(PathObject::new(
            name,
            self.root.to_string_lossy(),
            self.root.clone(),
        ))
    }

    fn is_directory(&self, path: &PathObject<PathBuf>) -> bool {
        fs::metadata(&path.handle).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn is_file(&self, path: &PathObject<PathBuf>) -> bool {
        fs::metadata(&path.handle).map(|m| m.is_file()).unwrap_or(false)
    }

    fn is_symlink(&self, path: &PathObject<PathBuf>) -> bool {
        fs::symlink_metadata(&path.handle)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn list_directory(&self, path: &PathObject<PathBuf>) -> io::Result<Vec<PathObject<PathBuf>>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(&path.handle)? {
            let entry = entry?;
            let child = entry.path();
            children.push(PathObject::new(
                entry.file_name().to_string_lossy(),
                child.to_string_lossy().into_owned(),
                child,
            ));
        }
        Ok(children)
    }

    fn get_path(&self, parent: &PathObject<PathBuf>, name: &str) -> Option<PathObject<PathBuf>> {
        let child = parent.handle.join(name);
        fs::symlink_metadata(&child).ok()?;
        Some(PathObject::new(name, child.to_string_lossy().into_owned(), child))
    }

    fn read_chunks<'a>(&'a self, path: &PathObject<PathBuf>) -> io::Result<Chunks<'a>> {
        let file = File::open(&path.handle)?;
        Ok(Box::new(FileChunks { file, done: false }))
    }

    fn size(&self, path: &PathObject<PathBuf>) -> u64 {
        fs::symlink_metadata(&path.handle).map(|m| m.len()).unwrap_or(0)
    }

    fn relative_path(&self, path: &PathObject<PathBuf>) -> String {
        self.strip_root(&path.path)
    }
}

struct FileChunks {
    file: File,
    done: bool,
}

impl Iterator for FileChunks {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let mut filled = 0;
        while filled < buffer.len() {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        if filled < buffer.len() {
            self.done = true;
        }
        buffer.truncate(filled);
        Some(Ok(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::pipeline::resolve;
    use crate::test_utils::create_pattern_tree;

    fn resolved(fs: &OsFileSystem, pattern: &str) -> Vec<String> {
        let mut paths: Vec<String> = resolve(fs, pattern, false)
            .map(|p| fs.relative_path(&p))
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_simple_paths() -> anyhow::Result<()> {
        let dir = create_pattern_tree()?;
        let fs = OsFileSystem::new(dir.path());

        assert_eq!(resolved(&fs, "root.txt"), vec!["root.txt"]);
        assert_eq!(resolved(&fs, "l1/l2/l2.txt"), vec!["l1/l2/l2.txt"]);
        assert!(resolved(&fs, "missing.txt").is_empty());
        assert!(resolved(&fs, "l1").is_empty());
        Ok(())
    }

    #[test]
    fn test_globbing() -> anyhow::Result<()> {
        let dir = create_pattern_tree()?;
        let fs = OsFileSystem::new(dir.path());

        assert_eq!(resolved(&fs, "*.txt"), vec!["root.txt", "root2.txt", "test.txt"]);
        assert_eq!(resolved(&fs, "root*.txt"), vec!["root.txt", "root2.txt"]);
        assert_eq!(resolved(&fs, "root?.txt"), vec!["root2.txt"]);
        assert_eq!(resolved(&fs, "l1/*/l2.txt"), vec!["l1/l2/l2.txt"]);
        Ok(())
    }

    #[test]
    fn test_recursion() -> anyhow::Result<()> {
        let dir = create_pattern_tree()?;
        let fs = OsFileSystem::new(dir.path());

        assert_eq!(resolved(&fs, "**/l2.txt"), vec!["l1/l2/l2.txt"]);
        assert_eq!(
            resolved(&fs, "**/*.txt"),
            vec!["l1/l1.txt", "l1/l2/l2.txt", "l1/l2/l3/l3.txt"]
        );
        assert_eq!(
            resolved(&fs, "**4/*.txt"),
            vec!["l1/l1.txt", "l1/l2/l2.txt", "l1/l2/l3/l3.txt", "l1/l2/l3/l4/l4.txt"]
        );
        assert_eq!(
            resolved(&fs, "**.txt"),
            vec!["l1/l1.txt", "l1/l2/l2.txt", "root.txt", "root2.txt", "test.txt"]
        );
        assert_eq!(resolved(&fs, "**-1").len(), 8);
        Ok(())
    }

    #[test]
    fn test_directories_follow_their_contents() -> anyhow::Result<()> {
        let dir = create_pattern_tree()?;
        let fs = OsFileSystem::new(dir.path());

        let order: Vec<String> = resolve(&fs, "l1/**-1", true)
            .map(|p| fs.relative_path(&p))
            .collect();
        let l2 = order.iter().position(|p| p == "l1/l2").unwrap();
        let l3 = order.iter().position(|p| p == "l1/l2/l3").unwrap();
        assert!(l3 < l2);
        Ok(())
    }

    #[test]
    fn test_read_chunks_and_size() -> anyhow::Result<()> {
        let dir = create_pattern_tree()?;
        let fs = OsFileSystem::new(dir.path());
        let path = resolve(&fs, "root.txt", false).next().unwrap();

        let content: Vec<u8> = fs
            .read_chunks(&path)?
            .collect::<io::Result<Vec<_>>>()?
            .concat();
        assert_eq!(content, b"root");
        assert_eq!(fs.size(&path), 4);
        assert!(!fs.is_symlink(&path));
        Ok(())
    }

    #[test]
    fn test_strip_root() {
        let fs = OsFileSystem::new("/mnt/evidence");
        assert_eq!(fs.strip_root("/mnt/evidence/var/log/*.log"), "var/log/*.log");
        assert_eq!(OsFileSystem::new("/").strip_root("/etc/passwd"), "etc/passwd");
    }
}
