//! Abstract path filesystems and glob-style path resolution over them.
//!
//! A backend exposes a tree of named entries (a mounted volume, a raw NTFS
//! image, or the Windows registry) through [`PathFileSystem`]. The
//! [`pipeline`] module turns a pattern such as `/var/log/**2/*.log` into a lazy
//! stream of matching [`PathObject`]s for any backend.
//!
//! ## Backends
//!
//! - [`OsFileSystem`]: the live filesystem below a mount point
//! - [`NtfsFileSystem`]: an NTFS volume or image parsed with the `ntfs` crate
//! - [`RegistryFileSystem`]: registry keys treated as directories
//!
//! ## Example
//!
//! ```no_run
//! use artifact_collector::filesystem::{pipeline, OsFileSystem, PathFileSystem};
//!
//! let fs = OsFileSystem::new("/");
//! for path in pipeline::resolve(&fs, "/var/log/*.log", false) {
//!     println!("{} ({} bytes)", path.path, fs.size(&path));
//! }
//! ```

use std::io;

use crate::constants::DEFAULT_RECURSION_DEPTH;

pub mod ntfs;
pub mod os;
pub mod pipeline;
pub mod registry;

pub use self::ntfs::{NtfsFileSystem, SectorReader};
pub use self::os::OsFileSystem;
pub use self::registry::{MemoryRegistry, RegistryBackend, RegistryFileSystem, RegistryValue};

#[cfg(target_os = "windows")]
pub use self::registry::WinRegistry;

/// Lazy stream of file content.
pub type Chunks<'a> = Box<dyn Iterator<Item = io::Result<Vec<u8>>> + 'a>;

/// An entry of a backend.
///
/// The handle type ties the object to the backend that produced it, so it can
/// never be handed to a different kind of backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathObject<H> {
    /// Last path component
    pub name: String,
    /// Full path in the backend's own notation
    pub path: String,
    /// Backend-specific locator
    pub handle: H,
}

impl<H> PathObject<H> {
    pub fn new(name: impl Into<String>, path: impl Into<String>, handle: H) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            handle,
        }
    }
}

/// A tree of named entries that the path pipeline can walk.
pub trait PathFileSystem {
    type Handle: Clone;

    /// The entry every pattern starts from.
    fn root(&self) -> Option<PathObject<Self::Handle>>;

    fn is_directory(&self, path: &PathObject<Self::Handle>) -> bool;

    fn is_file(&self, path: &PathObject<Self::Handle>) -> bool;

    fn is_symlink(&self, _path: &PathObject<Self::Handle>) -> bool {
        false
    }

    fn list_directory(&self, path: &PathObject<Self::Handle>) -> io::Result<Vec<PathObject<Self::Handle>>>;

    /// The child `name` of `parent`, if it exists.
    fn get_path(&self, parent: &PathObject<Self::Handle>, name: &str) -> Option<PathObject<Self::Handle>>;

    fn read_chunks<'a>(&'a self, path: &PathObject<Self::Handle>) -> io::Result<Chunks<'a>>;

    fn size(&self, path: &PathObject<Self::Handle>) -> u64;

    /// Separator used when splitting patterns.
    fn separator(&self) -> char {
        '/'
    }

    /// Depth applied to a bare `**`; `-1` means unlimited.
    fn default_recursion_depth(&self) -> i32 {
        DEFAULT_RECURSION_DEPTH
    }

    fn case_sensitive(&self) -> bool {
        true
    }

    /// Path of `path` relative to the backend root, with `/` separators.
    fn relative_path(&self, path: &PathObject<Self::Handle>) -> String {
        path.path.trim_start_matches('/').to_string()
    }
}
