//! NTFS volumes and images parsed with the `ntfs` crate.
//!
//! Reading the raw device bypasses file locks held by the running system, so
//! registry hives and the pagefile can be collected from a live Windows host.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ::ntfs::indexes::NtfsFileNameIndex;
use ::ntfs::structured_values::NtfsFileNamespace;
use ::ntfs::{Ntfs, NtfsError, NtfsFile, NtfsReadSeek};
use anyhow::{Context, Result};
use log::debug;

use super::{Chunks, PathFileSystem, PathObject};
use crate::constants::{NTFS_SECTOR_SIZE, READ_CHUNK_SIZE};

/// Turns arbitrary reads and seeks into sector-aligned ones.
///
/// Raw Windows volumes reject reads that do not start and end on a sector
/// boundary.
pub struct SectorReader<R> {
    inner: R,
    sector_size: usize,
    position: u64,
    buffer: Vec<u8>,
}

impl<R: Read + Seek> SectorReader<R> {
    pub fn new(inner: R, sector_size: usize) -> io::Result<Self> {
        if !sector_size.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sector size {} is not a power of two", sector_size),
            ));
        }
        Ok(Self {
            inner,
            sector_size,
            position: 0,
            buffer: Vec::new(),
        })
    }

    fn align_down(&self, value: u64) -> u64 {
        value & !(self.sector_size as u64 - 1)
    }

    fn align_up(&self, value: usize) -> usize {
        (value + self.sector_size - 1) & !(self.sector_size - 1)
    }
}

impl<R: Read + Seek> Read for SectorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let aligned_position = self.align_down(self.position);
        let start = (self.position - aligned_position) as usize;
        let aligned_len = self.align_up(start + buf.len());

        self.buffer.resize(aligned_len, 0);
        self.inner.seek(SeekFrom::Start(aligned_position))?;

        let mut filled = 0;
        while filled < aligned_len {
            match self.inner.read(&mut self.buffer[filled..aligned_len]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled <= start {
            return Ok(0);
        }
        let count = (filled - start).min(buf.len());
        buf[..count].copy_from_slice(&self.buffer[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek> Seek for SectorReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(n) => self.position.checked_add_signed(n),
            SeekFrom::End(n) => {
                let end = self.inner.seek(SeekFrom::End(0))?;
                end.checked_add_signed(n)
            }
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative offset",
            )),
        }
    }
}

type Reader<R> = BufReader<SectorReader<R>>;

/// An NTFS filesystem walked by MFT record number.
///
/// Paths are reported below `prefix`, usually the mount point of the volume.
pub struct NtfsFileSystem<R = File> {
    ntfs: Ntfs,
    reader: Mutex<Reader<R>>,
    prefix: String,
}

impl NtfsFileSystem<File> {
    /// Opens a device such as `\\.\C:` or an image file.
    pub fn open(device: impl AsRef<Path>) -> Result<Self> {
        let device = device.as_ref();
        let file = File::open(device)
            .with_context(|| format!("Failed to open NTFS device {}", device.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("{} is not a readable NTFS volume", device.display()))
    }
}

impl<R: Read + Seek> NtfsFileSystem<R> {
    pub fn from_reader(inner: R) -> Result<Self> {
        let mut reader = BufReader::new(SectorReader::new(inner, NTFS_SECTOR_SIZE)?);
        let mut ntfs = Ntfs::new(&mut reader)?;
        ntfs.read_upcase_table(&mut reader)?;
        Ok(Self {
            ntfs,
            reader: Mutex::new(reader),
            prefix: String::new(),
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_end_matches(['/', '\\']).to_string();
        self
    }

    fn reader(&self) -> MutexGuard<'_, Reader<R>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn file<'n>(&'n self, reader: &mut Reader<R>, record: u64) -> io::Result<NtfsFile<'n>> {
        self.ntfs.file(reader, record).map_err(to_io)
    }

    fn data_length(&self, record: u64) -> io::Result<u64> {
        let mut reader = self.reader();
        let file = self.file(&mut reader, record)?;
        let length = match file.data(&mut *reader, "") {
            Some(item) => item.map_err(to_io)?.to_attribute().map_err(to_io)?.value_length(),
            None => 0,
        };
        Ok(length)
    }

    /// Reads up to `buf.len()` bytes of the unnamed data stream from `offset`.
    fn read_at(&self, record: u64, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self.reader();
        let file = self.file(&mut reader, record)?;
        let item = match file.data(&mut *reader, "") {
            Some(item) => item.map_err(to_io)?,
            None => return Ok(0),
        };
        let attribute = item.to_attribute().map_err(to_io)?;
        let mut value = attribute.value(&mut *reader).map_err(to_io)?;
        value
            .seek(&mut *reader, SeekFrom::Start(offset))
            .map_err(to_io)?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = value.read(&mut *reader, &mut buf[filled..]).map_err(to_io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// B-tree lookup of `name` in the directory index of `parent`.
    fn find_child(
        &self,
        parent: &PathObject<u64>,
        name: &str,
    ) -> Result<Option<PathObject<u64>>, NtfsError> {
        let mut reader = self.reader();
        let directory = self.ntfs.file(&mut *reader, parent.handle)?;
        let index = directory.directory_index(&mut *reader)?;
        let mut finder = index.finder();

        let entry = match NtfsFileNameIndex::find(&mut finder, &self.ntfs, &mut *reader, name) {
            Some(entry) => entry?,
            None => return Ok(None),
        };
        let key = match entry.key() {
            Some(key) => key?,
            None => return Ok(None),
        };
        // short names stay hidden, as in listings
        if matches!(key.namespace(), NtfsFileNamespace::Dos) {
            return Ok(None);
        }
        let found = key.name().to_string_lossy();
        if found == "." {
            return Ok(None);
        }
        Ok(Some(PathObject::new(
            found.clone(),
            format!("{}/{}", parent.path, found),
            entry.file_reference().file_record_number(),
        )))
    }
}

fn to_io(e: NtfsError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

impl<R: Read + Seek> PathFileSystem for NtfsFileSystem<R> {
    type Handle = u64;

    fn root(&self) -> Option<PathObject<u64>> {
        let mut reader = self.reader();
        match self.ntfs.root_directory(&mut *reader) {
            Ok(root) => Some(PathObject::new(
                "",
                self.prefix.clone(),
                root.file_record_number(),
            )),
            Err(e) => {
                debug!("Unable to open NTFS root directory: {}", e);
                None
            }
        }
    }

    fn is_directory(&self, path: &PathObject<u64>) -> bool {
        let mut reader = self.reader();
        self.file(&mut reader, path.handle)
            .map(|f| f.is_directory())
            .unwrap_or(false)
    }

    fn is_file(&self, path: &PathObject<u64>) -> bool {
        let mut reader = self.reader();
        self.file(&mut reader, path.handle)
            .map(|f| !f.is_directory())
            .unwrap_or(false)
    }

    fn list_directory(&self, path: &PathObject<u64>) -> io::Result<Vec<PathObject<u64>>> {
        let mut reader = self.reader();
        let directory = self.file(&mut reader, path.handle)?;
        let index = directory.directory_index(&mut *reader).map_err(to_io)?;
        let mut iter = index.entries();

        let mut children = Vec::new();
        while let Some(entry) = iter.next(&mut *reader) {
            let entry = entry.map_err(to_io)?;
            let key = match entry.key() {
                Some(key) => key.map_err(to_io)?,
                None => continue,
            };
            if matches!(key.namespace(), NtfsFileNamespace::Dos) {
                continue;
            }
            let name = key.name().to_string_lossy();
            if name == "." {
                continue;
            }
            children.push(PathObject::new(
                name.clone(),
                format!("{}/{}", path.path, name),
                entry.file_reference().file_record_number(),
            ));
        }
        Ok(children)
    }

    fn get_path(&self, parent: &PathObject<u64>, name: &str) -> Option<PathObject<u64>> {
        match self.find_child(parent, name) {
            Ok(child) => child,
            Err(e) => {
                debug!(
                    "Index lookup of '{}' in {} failed, listing instead: {}",
                    name, parent.path, e
                );
                self.list_directory(parent)
                    .ok()?
                    .into_iter()
                    .find(|child| child.name.to_lowercase() == name.to_lowercase())
            }
        }
    }

    fn read_chunks<'a>(&'a self, path: &PathObject<u64>) -> io::Result<Chunks<'a>> {
        let length = self.data_length(path.handle)?;
        Ok(Box::new(NtfsChunks {
            fs: self,
            record: path.handle,
            offset: 0,
            length,
        }))
    }

    fn size(&self, path: &PathObject<u64>) -> u64 {
        self.data_length(path.handle).unwrap_or(0)
    }

    fn case_sensitive(&self) -> bool {
        false
    }

    fn relative_path(&self, path: &PathObject<u64>) -> String {
        path.path
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(&path.path)
            .trim_start_matches('/')
            .to_string()
    }
}

struct NtfsChunks<'a, R> {
    fs: &'a NtfsFileSystem<R>,
    record: u64,
    offset: u64,
    length: u64,
}

impl<'a, R: Read + Seek> Iterator for NtfsChunks<'a, R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.length {
            return None;
        }
        let wanted = (self.length - self.offset).min(READ_CHUNK_SIZE as u64) as usize;
        let mut buffer = vec![0u8; wanted];
        match self.fs.read_at(self.record, self.offset, &mut buffer) {
            Ok(0) => {
                self.offset = self.length;
                None
            }
            Ok(n) => {
                buffer.truncate(n);
                self.offset += n as u64;
                Some(Ok(buffer))
            }
            Err(e) => {
                self.offset = self.length;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::pipeline::resolve;
    use std::io::Cursor;

    fn data() -> Vec<u8> {
        (0..10_000u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_sector_reader_unaligned_reads() -> io::Result<()> {
        let data = data();
        let mut reader = SectorReader::new(Cursor::new(data.clone()), 512)?;

        reader.seek(SeekFrom::Start(700))?;
        let mut buf = [0u8; 100];
        reader.read_exact(&mut buf)?;
        assert_eq!(&buf[..], &data[700..800]);

        reader.seek(SeekFrom::Current(-50))?;
        reader.read_exact(&mut buf)?;
        assert_eq!(&buf[..], &data[750..850]);
        Ok(())
    }

    #[test]
    fn test_sector_reader_end_of_data() -> io::Result<()> {
        let data = data();
        let mut reader = SectorReader::new(Cursor::new(data.clone()), 4096)?;

        let end = reader.seek(SeekFrom::End(-10))?;
        assert_eq!(end, data.len() as u64 - 10);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        assert_eq!(rest, &data[data.len() - 10..]);
        assert!(reader.seek(SeekFrom::Current(-20_000)).is_err());
        Ok(())
    }

    #[test]
    fn test_sector_size_must_be_power_of_two() {
        assert!(SectorReader::new(Cursor::new(Vec::new()), 1000).is_err());
    }

    #[test]
    fn test_non_ntfs_data_is_rejected() {
        let result = NtfsFileSystem::from_reader(Cursor::new(vec![0u8; 64 * 1024]));
        assert!(result.is_err());
    }

    // Built by tests/fixtures/make_ntfs_fixture.py
    const IMAGE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/sample_ntfs.img");

    fn resolved(fs: &NtfsFileSystem, pattern: &str) -> Vec<String> {
        let mut paths: Vec<String> = resolve(fs, pattern, false).map(|p| p.path).collect();
        paths.sort();
        paths
    }

    fn content(fs: &NtfsFileSystem, path: &PathObject<u64>) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        for chunk in fs.read_chunks(path)? {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    #[test]
    fn test_root_listing_hides_short_names() -> Result<()> {
        let fs = NtfsFileSystem::open(IMAGE)?;
        let root = fs.root().context("no root")?;
        assert_eq!(root.handle, 5);
        assert_eq!(root.path, "");

        let children = fs.list_directory(&root)?;
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["big.bin", "Docs", "LongFileName.txt", "Readme.TXT"]);
        assert_eq!(children[1].path, "/Docs");
        assert_eq!(children[1].handle, 16);
        Ok(())
    }

    #[test]
    fn test_get_path_ignores_case() -> Result<()> {
        let fs = NtfsFileSystem::open(IMAGE)?;
        let root = fs.root().context("no root")?;

        let docs = fs.get_path(&root, "docs").context("docs not found")?;
        assert_eq!(docs.name, "Docs");
        assert_eq!(docs.handle, 16);
        assert!(fs.is_directory(&docs));

        let readme = fs.get_path(&root, "README.txt").context("readme not found")?;
        assert_eq!(readme.path, "/Readme.TXT");
        assert!(fs.is_file(&readme));

        assert!(fs.get_path(&root, "LONGFI~1.TXT").is_none());
        assert!(fs.get_path(&root, "missing").is_none());
        assert!(fs.get_path(&root, ".").is_none());
        Ok(())
    }

    #[test]
    fn test_resolve_over_image() -> Result<()> {
        let fs = NtfsFileSystem::open(IMAGE)?;

        assert_eq!(resolved(&fs, "DOCS/SUB/Deep.TXT"), ["/Docs/Sub/deep.txt"]);
        assert_eq!(resolved(&fs, "**/*.txt"), ["/Docs/Sub/deep.txt", "/Docs/notes.txt"]);
        assert_eq!(resolved(&fs, "*.txt"), ["/LongFileName.txt", "/Readme.TXT"]);

        let all = resolved(&fs, "**-1");
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|p| !p.contains('~')));
        Ok(())
    }

    #[test]
    fn test_read_multi_chunk_sparse_file() -> Result<()> {
        let fs = NtfsFileSystem::open(IMAGE)?;
        let root = fs.root().context("no root")?;
        let big = fs.get_path(&root, "big.bin").context("big.bin not found")?;
        assert_eq!(fs.size(&big), 5_251_072);

        let chunks = fs.read_chunks(&big)?.collect::<io::Result<Vec<_>>>()?;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), READ_CHUNK_SIZE);

        let data = chunks.concat();
        assert_eq!(data.len(), 5_251_072);
        let tail = data.len() - 4096;
        assert!((0..4096).all(|i| data[i] == (i % 251) as u8));
        assert!(data[4096..tail].iter().all(|&b| b == 0));
        assert!((0..4096).all(|i| data[tail + i] == b'a' + (i % 7) as u8));
        Ok(())
    }

    #[test]
    fn test_read_fragmented_file() -> Result<()> {
        let fs = NtfsFileSystem::open(IMAGE)?;
        let notes = resolve(&fs, "Docs/notes.txt", false)
            .next()
            .context("notes.txt not found")?;
        let expected: Vec<u8> = (0..9000).map(|i| b"abcdefghijklmnopqrstuvwxyz\n"[i % 27]).collect();
        assert_eq!(fs.size(&notes), 9000);
        assert_eq!(content(&fs, &notes)?, expected);

        let readme = resolve(&fs, "readme.txt", false).next().context("readme not found")?;
        assert_eq!(content(&fs, &readme)?, b"Hello from the NTFS image\n");
        Ok(())
    }

    #[test]
    fn test_prefixed_paths() -> Result<()> {
        let fs = NtfsFileSystem::open(IMAGE)?.with_prefix("C:/");
        let deep = resolve(&fs, "Docs/Sub/deep.txt", false)
            .next()
            .context("deep.txt not found")?;
        assert_eq!(deep.path, "C:/Docs/Sub/deep.txt");
        assert_eq!(fs.relative_path(&deep), "Docs/Sub/deep.txt");
        Ok(())
    }
}
