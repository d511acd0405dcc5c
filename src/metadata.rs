//! Metadata extraction - duration probing and artist/title parsing

use lofty::prelude::*;
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::enumerator::extension_permutations;
use crate::error::ScanError;
use crate::folder_config::ParseRules;
use crate::models::{ExtractedMedia, MediaCandidate, MediaKind, PairMedia, VideoMedia};

/// Reads the playback duration from a media container
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds
    fn probe_duration(&self, path: &Path) -> Result<f64, ScanError>;
}

/// Duration probe backed by lofty (MP3, M4A/MP4, and other containers)
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyProbe;

impl DurationProbe for LoftyProbe {
    fn probe_duration(&self, path: &Path) -> Result<f64, ScanError> {
        let tagged_file =
            lofty::read_from_path(path).map_err(|e| ScanError::from(e).with_path(path))?;
        Ok(tagged_file.properties().duration().as_secs_f64())
    }
}

/// Split a name into (artist, title) using the given rules
pub fn parse_artist_title(input: &str, rules: &ParseRules) -> Option<(String, String)> {
    if rules.delimiter.is_empty() {
        return None;
    }

    let mut text = input.to_string();
    for r in &rules.replacements {
        if !r.from.is_empty() {
            text = text.replace(&r.from, &r.to);
        }
    }

    let parts: Vec<&str> = text
        .split(rules.delimiter.as_str())
        .map(str::trim)
        .skip(rules.skip_parts)
        .collect();

    if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let joiner = rules.delimiter.as_str();
    let (artist, title) = if rules.artist_on_left {
        (parts[0].to_string(), parts[1..].join(joiner))
    } else {
        (parts[1..].join(joiner), parts[0].to_string())
    };

    Some((artist, title))
}

/// Format seconds as `m:ss` for logging
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn require_positive(duration: f64, path: &Path) -> Result<f64, ScanError> {
    if duration.is_finite() && duration > 0.0 {
        Ok(duration)
    } else {
        Err(ScanError::duration_unavailable(
            path.to_path_buf(),
            "Could not determine duration",
        ))
    }
}

/// Polymorphic extractor over media kinds
pub struct MetadataExtractor {
    probe: Box<dyn DurationProbe>,
    audio_extensions: Vec<String>,
}

impl MetadataExtractor {
    pub fn new(probe: Box<dyn DurationProbe>, audio_extensions: Vec<String>) -> Self {
        Self {
            probe,
            audio_extensions,
        }
    }

    pub fn extract(
        &self,
        candidate: &MediaCandidate,
        rules: &ParseRules,
    ) -> Result<ExtractedMedia, ScanError> {
        match candidate.kind {
            MediaKind::Pair => self.extract_pair(candidate, rules).map(ExtractedMedia::Pair),
            MediaKind::Video => self.extract_video(candidate).map(ExtractedMedia::Video),
        }
    }

    /// Sidecar paths to try, in order: each audio type, then each case permutation
    pub fn sidecar_candidates(&self, primary: &Path) -> Vec<(String, Vec<PathBuf>)> {
        self.audio_extensions
            .iter()
            .map(|ty| {
                let paths = extension_permutations(ty)
                    .into_iter()
                    .map(|ext| primary.with_extension(ext))
                    .collect();
                (ty.clone(), paths)
            })
            .collect()
    }

    /// Files whose bytes identify the candidate, located without probing.
    ///
    /// For a pair this is the graphics file plus the first existing sidecar;
    /// `None` when no sidecar exists at all.
    pub fn content_group(&self, candidate: &MediaCandidate) -> Option<Vec<PathBuf>> {
        match candidate.kind {
            MediaKind::Video => Some(vec![candidate.path.clone()]),
            MediaKind::Pair => self
                .sidecar_candidates(&candidate.path)
                .into_iter()
                .find_map(|(_, paths)| paths.into_iter().find(|p| p.is_file()))
                .map(|audio| vec![candidate.path.clone(), audio]),
        }
    }

    /// Parse artist/title, falling back to the parent folder name
    pub fn parse_names(
        &self,
        candidate: &MediaCandidate,
        rules: &ParseRules,
    ) -> Result<(String, String), ScanError> {
        let stem = candidate.stem();
        if let Some(parsed) = parse_artist_title(&stem, rules) {
            return Ok(parsed);
        }

        let folder = candidate
            .dir()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!("  => couldn't parse artist/title from filename; trying folder {:?}", folder);

        parse_artist_title(&folder, rules)
            .ok_or_else(|| ScanError::unparsable_metadata(candidate.path.clone(), &folder))
    }

    fn extract_pair(
        &self,
        candidate: &MediaCandidate,
        rules: &ParseRules,
    ) -> Result<PairMedia, ScanError> {
        let mut found_any = false;
        let mut last_err = None;

        for (ty, paths) in self.sidecar_candidates(&candidate.path) {
            let Some(audio_path) = paths.into_iter().find(|p| p.is_file()) else {
                continue;
            };
            found_any = true;
            debug!("  => found {} audio", ty);

            match self
                .probe
                .probe_duration(&audio_path)
                .and_then(|d| require_positive(d, &audio_path))
            {
                Ok(duration) => {
                    let audio_ext = audio_path
                        .extension()
                        .map(|e| e.to_string_lossy().to_string())
                        .unwrap_or(ty);
                    let (artist, title) = self.parse_names(candidate, rules)?;
                    return Ok(PairMedia {
                        artist,
                        title,
                        duration,
                        audio_path,
                        audio_ext,
                    });
                }
                Err(e) => {
                    // try the next audio type
                    warn!("  => unusable {} sidecar: {}", ty, e.message);
                    last_err = Some(e);
                }
            }
        }

        if !found_any {
            return Err(ScanError::missing_sidecar(candidate.path.clone()));
        }
        Err(last_err
            .map(|e| ScanError::duration_unavailable(candidate.path.clone(), e.message))
            .unwrap_or_else(|| {
                ScanError::duration_unavailable(candidate.path.clone(), "No usable sidecar")
            }))
    }

    fn extract_video(&self, candidate: &MediaCandidate) -> Result<VideoMedia, ScanError> {
        let duration = self
            .probe
            .probe_duration(&candidate.path)
            .map_err(|e| ScanError::duration_unavailable(candidate.path.clone(), e.message))
            .and_then(|d| require_positive(d, &candidate.path))?;

        Ok(VideoMedia {
            title: candidate.stem(),
            duration,
        })
    }
}
