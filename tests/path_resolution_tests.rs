//! Integration tests for variable substitution and glob resolution.

use std::fs;

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;

use artifact_collector::filesystem::pipeline::resolve;
use artifact_collector::filesystem::registry::split_hive;
use artifact_collector::filesystem::{MemoryRegistry, OsFileSystem, PathFileSystem, RegistryFileSystem};
use artifact_collector::variables::HostVariables;

fn pattern_tree() -> Result<TempDir> {
    let dir = TempDir::new()?;
    let base = dir.path();
    fs::create_dir_all(base.join("l1/l2/l3/l4/l5"))?;
    for (name, content) in [
        ("root.txt", "root"),
        ("root2.txt", "root2"),
        ("test.txt", "test"),
        ("l1/l1.txt", "l1"),
        ("l1/l2/l2.txt", "l2"),
        ("l1/l2/l3/l3.txt", "l3"),
        ("l1/l2/l3/l4/l4.txt", "l4"),
        ("l1/l2/l3/l4/l5/l5.txt", "l5"),
    ] {
        fs::write(base.join(name), content)?;
    }
    Ok(dir)
}

fn resolved<F: PathFileSystem>(fs: &F, pattern: &str) -> Vec<String> {
    let mut paths: Vec<String> = resolve(fs, pattern, false).map(|p| fs.relative_path(&p)).collect();
    paths.sort();
    paths
}

#[test]
fn test_substitution() {
    let variables = HostVariables::new(|v| {
        v.add_variable("USERDIR", "/home/user");
        v.add_variable("users.homedir", "/home/alice");
        v.add_variable("users.homedir", "/home/bob");
    });

    assert_eq!(
        variables.substitute("test%%USERDIR%%test").into_iter().collect::<Vec<_>>(),
        vec!["test/home/usertest"]
    );
    assert_eq!(
        variables.substitute("%%users.homedir%%/.bash_history").into_iter().collect::<Vec<_>>(),
        vec!["/home/alice/.bash_history", "/home/bob/.bash_history"]
    );
    assert_eq!(
        variables.substitute("no tokens here").into_iter().collect::<Vec<_>>(),
        vec!["no tokens here"]
    );
    assert_eq!(
        variables.substitute("%%unknown%%/x").into_iter().collect::<Vec<_>>(),
        vec!["%%unknown%%/x"]
    );
}

#[test]
fn test_nested_variables_are_resolved() {
    let variables = HostVariables::new(|v| {
        v.add_variable("systemroot", "%%systemdrive%%\\Windows");
        v.add_variable("systemdrive", "C:");
    });
    assert_eq!(
        variables.substitute("%%systemroot%%\\System32").into_iter().collect::<Vec<_>>(),
        vec!["C:\\Windows\\System32"]
    );
}

#[test]
fn test_file_globs() -> Result<()> {
    let dir = pattern_tree()?;
    let fs = OsFileSystem::new(dir.path());

    assert_eq!(resolved(&fs, "root*.txt"), vec!["root.txt", "root2.txt"]);
    assert_eq!(resolved(&fs, "root?.txt"), vec!["root2.txt"]);
    assert_eq!(resolved(&fs, "[rt]*.txt"), vec!["root.txt", "root2.txt", "test.txt"]);
    assert_eq!(resolved(&fs, "**/l2.txt"), vec!["l1/l2/l2.txt"]);
    assert_eq!(
        resolved(&fs, "**4/*.txt"),
        vec!["l1/l1.txt", "l1/l2/l2.txt", "l1/l2/l3/l3.txt", "l1/l2/l3/l4/l4.txt"]
    );
    Ok(())
}

#[test]
fn test_absolute_patterns_from_root() -> Result<()> {
    let dir = pattern_tree()?;
    let fs = OsFileSystem::new("/");
    let pattern = format!("{}/l1/**2/*.txt", dir.path().display());

    let found: Vec<String> = resolve(&fs, &pattern, false)
        .map(|p| p.name)
        .collect();
    let mut found = found;
    found.sort();
    assert_eq!(found, vec!["l2.txt", "l3.txt"]);
    Ok(())
}

#[test]
fn test_registry_globs() {
    let mut registry = MemoryRegistry::new();
    for key in [
        r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Run",
        r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\RunOnce",
        r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Explorer",
    ] {
        registry.set_value(key, "x", json!("y"), "REG_SZ");
    }

    let (hive, rest) = split_hive(r"HKEY_LOCAL_MACHINE\software\microsoft\windows\currentversion\RUN*");
    let fs = RegistryFileSystem::new(&registry, hive);
    let mut keys: Vec<String> = resolve(&fs, rest, true).map(|k| k.name).collect();
    keys.sort();
    assert_eq!(keys, vec!["Run", "RunOnce"]);

    let (hive, rest) = split_hive(r"HKEY_USERS\S-1-5-18\Software");
    let fs = RegistryFileSystem::new(&registry, hive);
    assert_eq!(resolve(&fs, rest, true).count(), 0);
}
