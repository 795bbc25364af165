//! Content hashing. MD5 hex is the digest S3 reports as the ETag of a
//! single-part upload.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::{io_err, SyncError};

/// Hashes local files for comparison with remote ETags.
pub trait ContentHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> Result<String, SyncError>;
}

/// Streaming MD5 of the file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl ContentHasher for Md5Hasher {
    fn hash_file(&self, path: &Path) -> Result<String, SyncError> {
        let mut file = File::open(path).map_err(|e| io_err(path, e))?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Hex MD5 of an in-memory body.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}
