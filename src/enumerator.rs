//! File enumeration - recursively lists candidate media files under a root

use log::warn;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::models::{normalize_separators, MediaCandidate, Root};

/// Every upper/lower case permutation of an extension, lowercase first.
///
/// Non-alphabetic characters are kept as-is, so `mp3` yields 4 permutations.
pub fn extension_permutations(ext: &str) -> Vec<String> {
    let mut perms = vec![String::new()];
    for c in ext.to_lowercase().chars() {
        let upper = c.to_ascii_uppercase();
        let mut next = Vec::with_capacity(perms.len() * 2);
        for p in &perms {
            next.push(format!("{}{}", p, c));
            if upper != c {
                next.push(format!("{}{}", p, upper));
            }
        }
        perms = next;
    }
    perms
}

/// Set of accepted extensions, expanded to all case permutations
#[derive(Debug, Clone, Default)]
pub struct ExtensionSet {
    accepted: HashSet<String>,
}

impl ExtensionSet {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let accepted = extensions
            .iter()
            .flat_map(|e| extension_permutations(e.as_ref().trim_start_matches('.')))
            .collect();
        Self { accepted }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.accepted.contains(e))
            .unwrap_or(false)
    }
}

/// Candidates found under one root, plus the parts of it that could not be read
#[derive(Debug, Default)]
pub struct RootListing {
    pub candidates: Vec<MediaCandidate>,
    /// Root-relative, `/`-separated paths of unreadable entries.
    /// An empty string stands for the whole root.
    pub unreadable: Vec<String>,
}

impl RootListing {
    /// Whether a stored relative path lies at or below an unreadable entry
    pub fn covers(unreadable: &[String], rel_path: &str) -> bool {
        unreadable.iter().any(|prefix| {
            prefix.is_empty()
                || rel_path == prefix
                || rel_path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// List all primary media files under a root, in stable (name-sorted) order.
///
/// Only a root that cannot be listed at all is `RootUnreachable`. Failures
/// further down (dangling links, link loops, unreadable folders) are logged
/// and recorded in `RootListing::unreadable` while the walk goes on.
pub fn list_candidates(root: &Root, config: &ScanConfig) -> Result<RootListing, ScanError> {
    // distinguish "can't list" from "empty"
    std::fs::read_dir(&root.path)
        .map_err(|e| ScanError::root_unreachable(root.path.clone(), e.to_string()))?;

    let extensions = ExtensionSet::new(&config.primary_extensions());
    let walker = WalkDir::new(&root.path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || entry
                    .file_name()
                    .to_str()
                    .map(|name| !config.should_ignore_dir(name))
                    .unwrap_or(true)
        });

    let mut listing = RootListing::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::root_unreachable(root.path.clone(), e.to_string()));
            }
            Err(e) => {
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(&root.path).ok())
                    .map(|p| normalize_separators(&p.to_string_lossy()))
                    .unwrap_or_default();
                warn!("  => cannot read {:?} under {}: {}", rel, root.path.display(), e);
                listing.unreadable.push(rel);
                continue;
            }
        };

        if !entry.file_type().is_file() || !extensions.matches(entry.path()) {
            continue;
        }

        let extension = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        if let Some(kind) = config.kind_for_extension(&extension) {
            listing.candidates.push(MediaCandidate {
                path: entry.path().to_path_buf(),
                extension,
                kind,
                root_id: root.id,
            });
        }
    }

    Ok(listing)
}
