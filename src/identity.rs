//! Content identity - cheap path+mtime keys and SHA-256 group digests

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::models::{MediaCandidate, MediaEntry, RootId};

/// Buffer size for hashing (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

/// Path + modification time key used to skip unchanged files
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FastIdentity {
    pub root_id: RootId,
    pub rel_path: String,
    /// Milliseconds since the epoch
    pub mtime: i64,
}

impl FastIdentity {
    pub fn of(candidate: &MediaCandidate, root: &Path) -> Result<Self, ScanError> {
        Ok(Self {
            root_id: candidate.root_id,
            rel_path: candidate.relative_path(root),
            mtime: mtime_millis(&candidate.path)?,
        })
    }

    pub fn matches(&self, entry: &MediaEntry) -> bool {
        entry.root_id == self.root_id
            && entry.rel_path == self.rel_path
            && entry.mtime == self.mtime
    }
}

/// Modification time in milliseconds since the epoch
pub fn mtime_millis(path: &Path) -> Result<i64, ScanError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ScanError::io_error(Some(path.to_path_buf()), e.to_string()))?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(mtime)
}

/// Content digest over every file of a group, read in the given order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrongIdentity(pub String);

impl StrongIdentity {
    pub fn compute(paths: &[PathBuf]) -> Result<Self, ScanError> {
        hash_group(paths).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// SHA-256 over the concatenated bytes of `paths`, hex encoded
pub fn hash_group(paths: &[PathBuf]) -> Result<String, ScanError> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    for path in paths {
        let file = File::open(path)
            .map_err(|e| ScanError::io_error(Some(path.clone()), e.to_string()))?;
        let mut reader = BufReader::new(file);
        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .map_err(|e| ScanError::io_error(Some(path.clone()), e.to_string()))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}
