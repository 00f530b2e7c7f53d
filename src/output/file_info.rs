use std::io;

use chrono::{SecondsFormat, Utc};
use log::{debug, warn};
use serde::Serialize;

use super::pe::{self, PeMetadata};
use crate::constants::{MAX_PE_SIZE, MIME_SNIFF_LENGTH};
use crate::utils::hash::{Hashes, MultiHasher};

/// MIME type reported for anything starting with `MZ`.
pub const PE_MIME_TYPE: &str = "application/x-msdownload";

/// One line of the file info output.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub file: FileDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDetails {
    pub size: u64,
    pub path: String,
    pub mime_type: String,
    pub hash: Hashes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe: Option<PeMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Labels {
    pub artifact: String,
}

impl FileInfo {
    /// Hashes and sniffs the content streamed by `chunks`.
    ///
    /// PE images below `MAX_PE_SIZE` are buffered so their headers can be parsed.
    pub fn compute<I>(path: &str, size: u64, chunks: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = io::Result<Vec<u8>>>,
    {
        debug!("Computing file info for {}", path);

        let mut hasher = MultiHasher::new();
        let mut mime_type: Option<String> = None;
        let mut content: Option<Vec<u8>> = None;

        for chunk in chunks {
            let chunk = chunk?;
            hasher.update(&chunk);

            if mime_type.is_none() {
                if chunk.starts_with(b"MZ") {
                    mime_type = Some(PE_MIME_TYPE.to_string());
                    if size < MAX_PE_SIZE {
                        content = Some(Vec::with_capacity(size as usize));
                    } else {
                        warn!("PE file {} exceeds buffer threshold, skipping PE parse", path);
                    }
                } else {
                    mime_type = Some(sniff_mime_type(&chunk));
                }
                debug!("Detected MIME type for {}: {:?}", path, mime_type);
            }
            if let Some(buffer) = content.as_mut() {
                buffer.extend_from_slice(&chunk);
            }
        }

        let pe = content.as_deref().and_then(pe::parse_metadata);
        Ok(Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            file: FileDetails {
                size,
                path: path.to_string(),
                mime_type: mime_type.unwrap_or_else(|| sniff_mime_type(&[])),
                hash: hasher.finalize(),
                pe,
            },
            labels: None,
        })
    }

    pub fn with_artifact(mut self, artifact: &str) -> Self {
        self.labels = Some(Labels {
            artifact: artifact.to_string(),
        });
        self
    }
}

/// MIME type of the leading bytes of a file.
///
/// Only the first `MIME_SNIFF_LENGTH` bytes decide between text and binary.
pub fn sniff_mime_type(data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    let head = &data[..data.len().min(MIME_SNIFF_LENGTH)];
    let utf8 = match std::str::from_utf8(head) {
        Ok(_) => true,
        // a character cut by the end of the window
        Err(e) => e.error_len().is_none(),
    };
    if utf8 && !head.contains(&0) {
        "text/plain; charset=utf-8".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(data: &[&[u8]]) -> Vec<io::Result<Vec<u8>>> {
        data.iter().map(|c| Ok(c.to_vec())).collect()
    }

    #[test]
    fn test_mz_content() -> io::Result<()> {
        let info = FileInfo::compute("C/test_file.txt", 14, chunks(&[b"MZtest content"]))?;

        assert_eq!(info.file.mime_type, "application/x-msdownload");
        assert_eq!(info.file.hash.md5, "10dbf3e392abcc57f8fae061c7c0aeec");
        assert_eq!(info.file.hash.sha1, "7ef0fe6c3855fbac1884e95622d9e45ce1d4ae9b");
        assert_eq!(
            info.file.hash.sha256,
            "cfb91ddbf08c52ff294fdf1657081a98c090d270dbb412a91ace815b3df947b6"
        );
        assert!(info.file.pe.is_none());
        Ok(())
    }

    #[test]
    fn test_record_layout() -> anyhow::Result<()> {
        let info = FileInfo::compute("etc/hosts", 9, chunks(&[b"127.0.0.1"]))?.with_artifact("UnixHosts");
        let record = serde_json::to_value(&info)?;

        assert!(record["@timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(record["file"]["size"], 9);
        assert_eq!(record["file"]["path"], "etc/hosts");
        assert_eq!(record["file"]["mime_type"], "text/plain; charset=utf-8");
        assert_eq!(record["labels"]["artifact"], "UnixHosts");
        assert!(record["file"].get("pe").is_none());
        Ok(())
    }

    #[test]
    fn test_sniff_mime_type() {
        assert_eq!(sniff_mime_type(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), "image/png");
        assert_eq!(sniff_mime_type(b"plain text"), "text/plain; charset=utf-8");
        assert_eq!(sniff_mime_type(b"\0\x01\x02\xff"), "application/octet-stream");
        assert_eq!(sniff_mime_type(b"ab\xffcd"), "application/octet-stream");
    }

    #[test]
    fn test_sniff_window_cuts_a_character() {
        let mut text = "a".repeat(MIME_SNIFF_LENGTH - 1).into_bytes();
        text.extend_from_slice("été".as_bytes());
        assert_eq!(sniff_mime_type(&text), "text/plain; charset=utf-8");

        // bytes past the window do not count
        let mut log = "x".repeat(MIME_SNIFF_LENGTH).into_bytes();
        log.extend_from_slice(b"\xff\0");
        assert_eq!(sniff_mime_type(&log), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_chunk_ends_inside_a_character() -> io::Result<()> {
        let info = FileInfo::compute("notes.txt", 5, chunks(&[b"caf\xc3", b"\xa9"]))?;
        assert_eq!(info.file.mime_type, "text/plain; charset=utf-8");
        Ok(())
    }

    #[test]
    fn test_read_error_is_propagated() {
        let failing = vec![Err(io::Error::new(io::ErrorKind::Other, "device gone"))];
        assert!(FileInfo::compute("x", 0, failing).is_err());
    }
}
