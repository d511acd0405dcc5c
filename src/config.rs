//! Configuration for the library synchronizer

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{MediaKind, Root};

/// Default per-folder configuration file name
pub const DEFAULT_FOLDER_CONFIG_NAME: &str = "media-sync.toml";

/// Default minimum interval between progress messages
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 250;

/// When to compute strong (content hash) identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Never hash; dedup relies on path + mtime only
    Never,
    /// Hash graphics+audio groups only
    #[default]
    Pairs,
    /// Hash every candidate
    Always,
}

impl HashPolicy {
    /// Whether candidates of the given kind get a content hash
    pub fn applies_to(&self, kind: MediaKind) -> bool {
        match self {
            HashPolicy::Never => false,
            HashPolicy::Pairs => kind == MediaKind::Pair,
            HashPolicy::Always => true,
        }
    }
}

impl std::str::FromStr for HashPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(HashPolicy::Never),
            "pairs" => Ok(HashPolicy::Pairs),
            "always" => Ok(HashPolicy::Always),
            other => Err(format!("unknown hash policy: {}", other)),
        }
    }
}

/// Configuration for the scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Root directories to scan
    pub roots: Vec<Root>,

    /// Extensions of graphics files that need an audio sidecar
    pub pair_extensions: Vec<String>,

    /// Sidecar audio extensions, in lookup order
    pub audio_extensions: Vec<String>,

    /// Extensions of self-contained video files
    pub video_extensions: Vec<String>,

    /// Directory names to ignore
    pub ignore_dirs: HashSet<String>,

    /// Strong identity policy
    pub hash_policy: HashPolicy,

    /// File name of the per-folder override
    pub folder_config_name: String,

    /// Minimum interval between progress messages
    pub progress_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            pair_extensions: vec!["cdg".to_string()],
            audio_extensions: vec!["m4a".to_string(), "mp3".to_string()],
            video_extensions: vec!["mp4".to_string()],
            ignore_dirs: Self::default_ignore_dirs(),
            hash_policy: HashPolicy::default(),
            folder_config_name: DEFAULT_FOLDER_CONFIG_NAME.to_string(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl ScanConfig {
    /// Create a new config with the given roots
    pub fn new(roots: Vec<Root>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            ".Trash-1000",
            "@eaDir",
            ".git",
            ".svn",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Classify an extension (any case) as a primary media kind
    pub fn kind_for_extension(&self, ext: &str) -> Option<MediaKind> {
        let matches = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(ext));
        if matches(&self.pair_extensions) {
            Some(MediaKind::Pair)
        } else if matches(&self.video_extensions) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// All primary (non-sidecar) extensions
    pub fn primary_extensions(&self) -> Vec<String> {
        self.pair_extensions
            .iter()
            .chain(self.video_extensions.iter())
            .cloned()
            .collect()
    }

    /// Check if a directory should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        self.ignore_dirs.contains(name)
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the roots
    pub fn roots(mut self, roots: Vec<Root>) -> Self {
        self.config.roots = roots;
        self
    }

    /// Add a root
    pub fn add_root(mut self, root: Root) -> Self {
        self.config.roots.push(root);
        self
    }

    /// Set the graphics extensions that need a sidecar
    pub fn pair_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.pair_extensions = extensions;
        self
    }

    /// Set the sidecar audio extensions, in lookup order
    pub fn audio_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.audio_extensions = extensions;
        self
    }

    /// Set the self-contained video extensions
    pub fn video_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.video_extensions = extensions;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Set when content hashes are computed
    pub fn hash_policy(mut self, policy: HashPolicy) -> Self {
        self.config.hash_policy = policy;
        self
    }

    /// Set the per-folder override file name
    pub fn folder_config_name(mut self, name: impl Into<String>) -> Self {
        self.config.folder_config_name = name.into();
        self
    }

    /// Set the progress throttle interval
    pub fn progress_interval_ms(mut self, interval: u64) -> Self {
        self.config.progress_interval_ms = interval;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}
