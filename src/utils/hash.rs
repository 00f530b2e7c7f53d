use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Hex digests of one piece of content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// Incremental MD5, SHA-1 and SHA-256 over a stream of chunks.
pub struct MultiHasher {
    md5: md5::Context,
    sha1: Sha1,
    sha256: Sha256,
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiHasher {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    pub fn finalize(self) -> Hashes {
        Hashes {
            md5: format!("{:x}", self.md5.compute()),
            sha1: format!("{:x}", self.sha1.finalize()),
            sha256: format!("{:x}", self.sha256.finalize()),
        }
    }
}
