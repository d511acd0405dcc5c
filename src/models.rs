//! Core data models for the library synchronizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ScanError, ScanErrorKind};

/// Identifier of a configured root
pub type RootId = i64;

/// Identifier of a persisted library entry
pub type MediaId = i64;

/// A configured top-level directory to scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub id: RootId,
    pub path: PathBuf,
}

impl Root {
    /// Create a root
    pub fn new(id: RootId, path: PathBuf) -> Self {
        Self { id, path }
    }
}

/// Media kind, selected by the primary file's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Graphics track with a required audio sidecar
    Pair,
    /// Self-contained video
    Video,
}

impl MediaKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Pair => "pair",
            MediaKind::Video => "video",
        }
    }

    /// Parse the stored representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pair" => Some(MediaKind::Pair),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A file discovered during enumeration, not yet committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    /// Absolute path of the primary file
    pub path: PathBuf,
    /// Extension as found on disk (original casing)
    pub extension: String,
    pub kind: MediaKind,
    pub root_id: RootId,
}

impl MediaCandidate {
    /// Containing directory, used for config cascade grouping
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// File name without extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Path relative to the owning root, always with `/` separators
    pub fn relative_path(&self, root: &Path) -> String {
        let rel = self.path.strip_prefix(root).unwrap_or(&self.path);
        normalize_separators(&rel.to_string_lossy())
    }
}

/// Normalize path separators for cross-platform consistency
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Metadata produced by the extractor for a graphics+audio pair
#[derive(Debug, Clone, PartialEq)]
pub struct PairMedia {
    pub artist: String,
    pub title: String,
    pub duration: f64,
    /// Located sidecar path
    pub audio_path: PathBuf,
    /// Sidecar extension as found on disk
    pub audio_ext: String,
}

/// Metadata produced by the extractor for a self-contained video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMedia {
    pub title: String,
    pub duration: f64,
}

/// Result of metadata extraction, one variant per media kind
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedMedia {
    Pair(PairMedia),
    Video(VideoMedia),
}

impl ExtractedMedia {
    pub fn duration(&self) -> f64 {
        match self {
            ExtractedMedia::Pair(m) => m.duration,
            ExtractedMedia::Video(m) => m.duration,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            ExtractedMedia::Pair(_) => MediaKind::Pair,
            ExtractedMedia::Video(_) => MediaKind::Video,
        }
    }

    /// Files that make up this media, in hashing order
    pub fn group_paths(&self, primary: &Path) -> Vec<PathBuf> {
        match self {
            ExtractedMedia::Pair(m) => vec![primary.to_path_buf(), m.audio_path.clone()],
            ExtractedMedia::Video(_) => vec![primary.to_path_buf()],
        }
    }
}

/// Provider-specific metadata persisted alongside an entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// A persisted library record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub id: MediaId,
    pub root_id: RootId,
    /// Path relative to the root, `/`-separated
    pub rel_path: String,
    pub kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub title: String,
    /// Duration in seconds
    pub duration: f64,
    /// Modification time in milliseconds since the epoch
    pub mtime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub provider_meta: ProviderMeta,
    pub added_at: DateTime<Utc>,
}

/// An entry about to be added to the library
#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaEntry {
    pub root_id: RootId,
    pub rel_path: String,
    pub kind: MediaKind,
    pub artist: Option<String>,
    pub title: String,
    pub duration: f64,
    pub mtime: i64,
    pub content_hash: Option<String>,
    pub provider_meta: ProviderMeta,
}

impl NewMediaEntry {
    /// Build an entry from extraction output
    pub fn from_extracted(
        root_id: RootId,
        rel_path: String,
        mtime: i64,
        media: ExtractedMedia,
        content_hash: Option<String>,
    ) -> Self {
        let (kind, artist, title, duration, audio_ext) = match media {
            ExtractedMedia::Pair(m) => (
                MediaKind::Pair,
                Some(m.artist),
                m.title,
                m.duration,
                Some(m.audio_ext),
            ),
            ExtractedMedia::Video(m) => (MediaKind::Video, None, m.title, m.duration, None),
        };

        Self {
            root_id,
            rel_path,
            kind,
            artist,
            title,
            duration,
            mtime,
            provider_meta: ProviderMeta {
                audio_ext,
                sha256: content_hash.clone(),
            },
            content_hash,
        }
    }
}

/// A candidate that was skipped, with the reason
#[derive(Debug, Clone, Serialize)]
pub struct SkippedCandidate {
    pub path: PathBuf,
    pub reason: ScanErrorKind,
    pub message: String,
}

impl SkippedCandidate {
    pub fn from_error(path: &Path, err: &ScanError) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: err.kind,
            message: err.message.clone(),
        }
    }
}

/// End-of-scan summary
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// Entries created during this pass
    pub new: u64,
    /// Existing entries confirmed by fast identity
    pub unchanged: u64,
    /// Candidates skipped due to a candidate-level error
    pub skipped: u64,
    /// Orphaned entries removed
    pub removed: u64,
    /// Outdated entries swapped for a re-extracted version of the same file
    pub replaced: u64,
    /// Candidates discovered across reachable roots
    pub candidates: u64,
    /// Candidates whose content was hashed
    pub hashed: u64,
    pub unreachable_roots: Vec<RootId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_paths: Vec<SkippedCandidate>,
    /// Non-fatal problems (e.g. a failed cleanup batch)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// Total scan duration in milliseconds
    pub duration_ms: u64,
}

impl Default for ScanSummary {
    fn default() -> Self {
        Self {
            new: 0,
            unchanged: 0,
            skipped: 0,
            removed: 0,
            replaced: 0,
            candidates: 0,
            hashed: 0,
            unreachable_roots: Vec::new(),
            skipped_paths: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

impl ScanSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&mut self, path: &Path, err: &ScanError) {
        self.skipped += 1;
        self.skipped_paths.push(SkippedCandidate::from_error(path, err));
    }

    /// Check if the scan completed without warnings
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.unreachable_roots.is_empty()
    }
}
