//! Media library synchronizer
//!
//! Walks configured roots, discovers karaoke pairs (graphics + audio
//! sidecar) and standalone videos, extracts duration and artist/title,
//! and reconciles a persisted library with what currently exists on disk.

pub mod config;
pub mod db;
pub mod enumerator;
pub mod error;
pub mod folder_config;
pub mod identity;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod scanner;

pub use config::{HashPolicy, ScanConfig};
pub use db::{LibraryStore, MediaFilter, SearchResult, SqliteLibrary};
pub use error::{ScanError, ScanErrorKind};
pub use folder_config::{FolderConfig, FolderConfigResolver, ParseRules};
pub use metadata::{DurationProbe, LoftyProbe, MetadataExtractor};
pub use models::{
    ExtractedMedia, MediaCandidate, MediaEntry, MediaId, MediaKind, NewMediaEntry, PairMedia,
    Root, RootId, ScanSummary, SkippedCandidate, VideoMedia,
};
pub use progress::{NullObserver, ProgressReporter, ScanObserver, ScanPhase};
pub use scanner::{CancellationToken, LibraryScanner};
