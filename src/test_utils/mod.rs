//! Test utilities for artifact_collector
//!
//! Shared fixtures for the unit tests of the filesystem, output and collector
//! modules.

#![cfg(test)]

use anyhow::Result;
use std::fs;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// Creates a temporary directory that is automatically cleaned up
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a temporary file with the given content
pub fn create_temp_file(content: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

/// Creates the nested tree used by the path resolution tests:
///
/// ```text
/// root.txt  root2.txt  test.txt
/// l1/l1.txt
/// l1/l2/l2.txt
/// l1/l2/l3/l3.txt
/// l1/l2/l3/l4/l4.txt
/// l1/l2/l3/l4/l5/l5.txt
/// ```
pub fn create_pattern_tree() -> Result<TempDir> {
    let temp_dir = create_temp_dir()?;
    let base_path = temp_dir.path();

    fs::create_dir_all(base_path.join("l1/l2/l3/l4/l5"))?;

    fs::write(base_path.join("root.txt"), b"root")?;
    fs::write(base_path.join("root2.txt"), b"root2")?;
    fs::write(base_path.join("test.txt"), b"test")?;
    fs::write(base_path.join("l1/l1.txt"), b"l1")?;
    fs::write(base_path.join("l1/l2/l2.txt"), b"l2")?;
    fs::write(base_path.join("l1/l2/l3/l3.txt"), b"l3")?;
    fs::write(base_path.join("l1/l2/l3/l4/l4.txt"), b"l4")?;
    fs::write(base_path.join("l1/l2/l3/l4/l5/l5.txt"), b"l5")?;

    Ok(temp_dir)
}

/// Writes `content` below `dir` and returns the full path as a string.
pub fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> Result<String> {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
    Ok(path.to_string_lossy().to_string())
}
