//! The Windows registry seen as a filesystem.
//!
//! Keys are directories and every opened key also counts as a file, so the
//! last segment of a pattern may name a key that holds only values. Values are
//! not entries of the tree; they are read from a resolved key with
//! [`RegistryFileSystem::key_values`] and [`RegistryFileSystem::key_value`].

use std::collections::BTreeMap;
use std::io;

use serde::Serialize;
use serde_json::Value;

use super::{Chunks, PathFileSystem, PathObject};

/// A registry value with its data converted to JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryValue {
    #[serde(skip)]
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: String,
}

impl RegistryValue {
    pub fn new(name: impl Into<String>, value: Value, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            value_type: value_type.into(),
        }
    }
}

/// Key access by full path (`HKEY_LOCAL_MACHINE\Software\...`).
pub trait RegistryBackend {
    fn key_exists(&self, path: &str) -> bool;

    fn subkey_names(&self, path: &str) -> io::Result<Vec<String>>;

    fn values(&self, path: &str) -> io::Result<Vec<RegistryValue>>;
}

impl<B: RegistryBackend + ?Sized> RegistryBackend for &B {
    fn key_exists(&self, path: &str) -> bool {
        (**self).key_exists(path)
    }

    fn subkey_names(&self, path: &str) -> io::Result<Vec<String>> {
        (**self).subkey_names(path)
    }

    fn values(&self, path: &str) -> io::Result<Vec<RegistryValue>> {
        (**self).values(path)
    }
}

/// Walks the keys of one hive.
#[derive(Debug)]
pub struct RegistryFileSystem<B> {
    backend: B,
    hive: String,
}

impl<B: RegistryBackend> RegistryFileSystem<B> {
    pub fn new(backend: B, hive: impl Into<String>) -> Self {
        Self {
            backend,
            hive: hive.into(),
        }
    }

    pub fn hive(&self) -> &str {
        &self.hive
    }

    /// Every value of the key at `path`.
    pub fn key_values(&self, path: &PathObject<String>) -> io::Result<Vec<RegistryValue>> {
        self.backend.values(&path.handle)
    }

    /// The value `name` of the key at `path`, matched case-insensitively.
    pub fn key_value(&self, path: &PathObject<String>, name: &str) -> io::Result<Option<RegistryValue>> {
        Ok(self
            .backend
            .values(&path.handle)?
            .into_iter()
            .find(|value| value.name.eq_ignore_ascii_case(name)))
    }
}

/// Splits `HKEY_USERS\S-1-5-18\Software` into the hive and the remaining path.
pub fn split_hive(key: &str) -> (&str, &str) {
    match key.split_once('\\') {
        Some((hive, rest)) => (hive, rest),
        None => (key, ""),
    }
}

impl<B: RegistryBackend> PathFileSystem for RegistryFileSystem<B> {
    type Handle = String;

    fn root(&self) -> Option<PathObject<String>> {
        if self.backend.key_exists(&self.hive) {
            Some(PathObject::new(self.hive.clone(), self.hive.clone(), self.hive.clone()))
        } else {
            None
        }
    }

    fn is_directory(&self, path: &PathObject<String>) -> bool {
        self.backend.key_exists(&path.handle)
    }

    fn is_file(&self, path: &PathObject<String>) -> bool {
        self.backend.key_exists(&path.handle)
    }

    fn list_directory(&self, path: &PathObject<String>) -> io::Result<Vec<PathObject<String>>> {
        Ok(self
            .backend
            .subkey_names(&path.handle)?
            .into_iter()
            .map(|name| {
                let full = format!("{}\\{}", path.handle, name);
                PathObject::new(name, full.clone(), full)
            })
            .collect())
    }

    fn get_path(&self, parent: &PathObject<String>, name: &str) -> Option<PathObject<String>> {
        let full = format!("{}\\{}", parent.handle, name);
        if self.backend.key_exists(&full) {
            Some(PathObject::new(name, full.clone(), full))
        } else {
            None
        }
    }

    fn read_chunks<'a>(&'a self, path: &PathObject<String>) -> io::Result<Chunks<'a>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("registry key {} has no content stream", path.path),
        ))
    }

    fn size(&self, _path: &PathObject<String>) -> u64 {
        0
    }

    fn separator(&self) -> char {
        '\\'
    }

    fn default_recursion_depth(&self) -> i32 {
        -1
    }

    fn case_sensitive(&self) -> bool {
        false
    }

    fn relative_path(&self, path: &PathObject<String>) -> String {
        path.path.clone()
    }
}

/// An in-memory registry tree.
///
/// Used where the native registry is unavailable and to exercise the registry
/// collector in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    keys: BTreeMap<String, MemoryKey>,
}

#[derive(Debug, Clone, Default)]
struct MemoryKey {
    name: String,
    subkeys: BTreeMap<String, MemoryKey>,
    values: Vec<RegistryValue>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the key at `path` and any missing parents.
    pub fn add_key(&mut self, path: &str) {
        self.key_mut(path);
    }

    /// Sets a value, creating the key if needed.
    pub fn set_value(&mut self, path: &str, name: &str, value: Value, value_type: &str) {
        let key = self.key_mut(path);
        key.values.retain(|v| !v.name.eq_ignore_ascii_case(name));
        key.values.push(RegistryValue::new(name, value, value_type));
    }

    fn key_mut(&mut self, path: &str) -> &mut MemoryKey {
        let mut components = path.split('\\').filter(|c| !c.is_empty());
        let hive = components.next().unwrap_or_default();
        let mut key = self
            .keys
            .entry(hive.to_lowercase())
            .or_insert_with(|| MemoryKey {
                name: hive.to_string(),
                ..Default::default()
            });
        for component in components {
            key = key
                .subkeys
                .entry(component.to_lowercase())
                .or_insert_with(|| MemoryKey {
                    name: component.to_string(),
                    ..Default::default()
                });
        }
        key
    }

    fn find(&self, path: &str) -> Option<&MemoryKey> {
        let mut components = path.split('\\').filter(|c| !c.is_empty());
        let mut key = self.keys.get(&components.next()?.to_lowercase())?;
        for component in components {
            key = key.subkeys.get(&component.to_lowercase())?;
        }
        Some(key)
    }

    fn not_found(path: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("registry key not found: {}", path))
    }
}

impl RegistryBackend for MemoryRegistry {
    fn key_exists(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    fn subkey_names(&self, path: &str) -> io::Result<Vec<String>> {
        let key = self.find(path).ok_or_else(|| Self::not_found(path))?;
        Ok(key.subkeys.values().map(|k| k.name.clone()).collect())
    }

    fn values(&self, path: &str) -> io::Result<Vec<RegistryValue>> {
        let key = self.find(path).ok_or_else(|| Self::not_found(path))?;
        Ok(key.values.clone())
    }
}

#[cfg(target_os = "windows")]
pub use self::native::WinRegistry;

#[cfg(target_os = "windows")]
mod native {
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, RwLock};

    use serde_json::{json, Value};
    use winreg::enums::{
        RegType, HKEY_CLASSES_ROOT, HKEY_LOCAL_MACHINE, HKEY_USERS, KEY_READ,
    };
    use winreg::types::FromRegValue;
    use winreg::{RegKey, RegValue};

    use super::{split_hive, RegistryBackend, RegistryValue};

    /// The live registry of the host, read through `winreg`.
    #[derive(Default)]
    pub struct WinRegistry {
        // lower-cased key path -> opened key
        cache: RwLock<HashMap<String, Arc<RegKey>>>,
    }

    impl WinRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        fn open(&self, path: &str) -> io::Result<Arc<RegKey>> {
            let cache_key = path.to_lowercase();
            if let Some(key) = self
                .cache
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&cache_key)
            {
                return Ok(Arc::clone(key));
            }

            let (hive, rest) = split_hive(path);
            let predef = match hive.to_uppercase().as_str() {
                "HKEY_LOCAL_MACHINE" => RegKey::predef(HKEY_LOCAL_MACHINE),
                "HKEY_USERS" => RegKey::predef(HKEY_USERS),
                "HKEY_CLASSES_ROOT" => RegKey::predef(HKEY_CLASSES_ROOT),
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("unsupported registry hive: {}", other),
                    ))
                }
            };
            let key = if rest.is_empty() {
                predef
            } else {
                predef.open_subkey_with_flags(rest, KEY_READ)?
            };

            let key = Arc::new(key);
            self.cache
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(cache_key, Arc::clone(&key));
            Ok(key)
        }
    }

    impl RegistryBackend for WinRegistry {
        fn key_exists(&self, path: &str) -> bool {
            self.open(path).is_ok()
        }

        fn subkey_names(&self, path: &str) -> io::Result<Vec<String>> {
            self.open(path)?.enum_keys().collect()
        }

        fn values(&self, path: &str) -> io::Result<Vec<RegistryValue>> {
            let key = self.open(path)?;
            let mut values = Vec::new();
            for item in key.enum_values() {
                let (name, raw) = item?;
                let (value, value_type) = convert(&raw);
                values.push(RegistryValue::new(name, value, value_type));
            }
            Ok(values)
        }
    }

    fn convert(raw: &RegValue) -> (Value, &'static str) {
        match raw.vtype {
            RegType::REG_SZ => (string(raw), "REG_SZ"),
            RegType::REG_EXPAND_SZ => (string(raw), "REG_EXPAND_SZ"),
            RegType::REG_MULTI_SZ => match Vec::<String>::from_reg_value(raw) {
                Ok(items) => (json!(items), "REG_MULTI_SZ"),
                Err(_) => (hex(&raw.bytes), "REG_MULTI_SZ"),
            },
            RegType::REG_DWORD => match u32::from_reg_value(raw) {
                Ok(n) => (json!(n), "REG_DWORD"),
                Err(_) => (hex(&raw.bytes), "REG_DWORD"),
            },
            RegType::REG_QWORD => match u64::from_reg_value(raw) {
                Ok(n) => (json!(n), "REG_QWORD"),
                Err(_) => (hex(&raw.bytes), "REG_QWORD"),
            },
            _ => (hex(&raw.bytes), "REG_BINARY"),
        }
    }

    fn string(raw: &RegValue) -> Value {
        match String::from_reg_value(raw) {
            Ok(s) => Value::String(s),
            Err(_) => hex(&raw.bytes),
        }
    }

    fn hex(bytes: &[u8]) -> Value {
        Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }
}
