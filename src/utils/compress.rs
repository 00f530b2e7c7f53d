use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use sha2::{Digest, Sha256};
use zip::{write::FileOptions, ZipWriter};

/// Entries at or above this size need ZIP64 headers.
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;

/// ZIP options for a collected file.
pub fn get_compression_options(size: u64) -> FileOptions {
    FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(6))
        .unix_permissions(0o644)
        .large_file(size >= ZIP64_THRESHOLD)
}

/// A ZIP archive that is only created once the first entry arrives.
pub struct ArchiveWriter {
    path: PathBuf,
    writer: Option<ZipWriter<File>>,
    entries: HashSet<String>,
}

impl ArchiveWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            entries: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Streams `chunks` into a new entry `name`.
    ///
    /// Returns the SHA-256 of the content when `sha256` is set.
    pub fn add_entry<I>(&mut self, name: &str, size: u64, chunks: I, sha256: bool) -> Result<Option<String>>
    where
        I: IntoIterator<Item = io::Result<Vec<u8>>>,
    {
        let zip = match &mut self.writer {
            Some(zip) => zip,
            slot @ None => {
                let file = File::create(&self.path)
                    .with_context(|| format!("Failed to create archive {}", self.path.display()))?;
                slot.insert(ZipWriter::new(file))
            }
        };

        zip.start_file(name, get_compression_options(size))
            .with_context(|| format!("Failed to start file entry for {}", name))?;
        self.entries.insert(name.to_string());

        let mut hasher = sha256.then(Sha256::new);
        for chunk in chunks {
            let chunk = chunk.with_context(|| format!("Failed to read {}", name))?;
            zip.write_all(&chunk)
                .with_context(|| format!("Failed to write to zip for {}", name))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
        }

        debug!("Archived {} ({} bytes)", name, size);
        Ok(hasher.map(|h| format!("{:x}", h.finalize())))
    }

    /// Writes the central directory. Does nothing if no entry was added.
    pub fn finish(&mut self) -> Result<Option<PathBuf>> {
        match self.writer.take() {
            Some(mut zip) => {
                let mut file = zip
                    .finish()
                    .with_context(|| format!("Failed to finalize archive {}", self.path.display()))?;
                file.flush()?;
                Ok(Some(self.path.clone()))
            }
            None => Ok(None),
        }
    }
}
