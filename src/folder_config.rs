//! Per-folder configuration overrides and their cascading resolver

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ScanError;

/// Default separator between artist and title
pub const DEFAULT_DELIMITER: &str = " - ";

/// A literal text replacement applied before parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    #[serde(default)]
    pub to: String,
}

/// Rules for splitting a file or folder name into artist and title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseRules {
    pub delimiter: String,
    /// `Artist - Title` when true, `Title - Artist` otherwise
    pub artist_on_left: bool,
    /// Leading parts to discard (disc ids, track numbers)
    pub skip_parts: usize,
    pub replacements: Vec<Replacement>,
}

impl Default for ParseRules {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            artist_on_left: true,
            skip_parts: 0,
            replacements: Vec::new(),
        }
    }
}

/// Contents of a per-folder override file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    pub parser: ParseRules,
}

impl FolderConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScanError::config(path.to_path_buf(), e.to_string()))?;
        Self::from_toml(&text).map_err(|e| ScanError::config(path.to_path_buf(), e.to_string()))
    }
}

/// Resolves the nearest override for a directory, bounded by the root.
///
/// Holds a single-slot cache keyed by directory; consecutive files from the
/// same directory reuse the last resolution.
#[derive(Debug)]
pub struct FolderConfigResolver {
    file_name: String,
    last: Option<(PathBuf, Arc<FolderConfig>)>,
    walks: u64,
}

impl FolderConfigResolver {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            last: None,
            walks: 0,
        }
    }

    /// Resolve the config for `dir`, never looking above `root`
    pub fn resolve(&mut self, dir: &Path, root: &Path) -> Arc<FolderConfig> {
        if let Some((cached_dir, config)) = &self.last {
            if cached_dir == dir {
                return Arc::clone(config);
            }
        }

        let config = Arc::new(self.walk(dir, root));
        self.last = Some((dir.to_path_buf(), Arc::clone(&config)));
        config
    }

    /// Number of uncached resolutions performed
    pub fn walks(&self) -> u64 {
        self.walks
    }

    fn walk(&mut self, dir: &Path, root: &Path) -> FolderConfig {
        self.walks += 1;

        // outside the root only the directory itself is considered
        let bounded: Vec<&Path> = if dir.starts_with(root) {
            dir.ancestors().take_while(|d| d.starts_with(root)).collect()
        } else {
            vec![dir]
        };

        for candidate_dir in bounded {
            let file = candidate_dir.join(&self.file_name);
            if !file.is_file() {
                continue;
            }
            match FolderConfig::load(&file) {
                Ok(config) => {
                    debug!("Using config {}", file.display());
                    return config;
                }
                Err(e) => warn!("Ignoring unreadable config {}: {}", file.display(), e.message),
            }
        }

        debug!("No config found for {}", dir.display());
        FolderConfig::default()
    }
}
