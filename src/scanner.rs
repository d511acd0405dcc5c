//! Scanner module - reconciles the library with what is on disk
//!
//! A scan lists every configured root, processes each candidate through
//! dedup, extraction and persistence, then removes entries that were not
//! confirmed present. Entries owned by a root that could not be listed, or
//! lying under an unreadable part of a root, are never removed.

use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::ScanConfig;
use crate::db::{check_id, LibraryStore, MediaFilter};
use crate::enumerator::{list_candidates, RootListing};
use crate::error::ScanError;
use crate::folder_config::{FolderConfigResolver, ParseRules};
use crate::identity::{FastIdentity, StrongIdentity};
use crate::metadata::{format_duration, DurationProbe, LoftyProbe, MetadataExtractor};
use crate::models::{
    MediaCandidate, MediaEntry, MediaId, MediaKind, NewMediaEntry, Root, RootId, ScanSummary,
};
use crate::progress::{ScanObserver, ScanPhase};

/// Cooperative cancellation flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a candidate was resolved against the library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Already in the library with the same path and mtime
    Existing(MediaId),
    /// Newly extracted and committed
    Created(MediaId),
}

/// Transient state for a single scan invocation
#[derive(Debug, Default)]
pub struct ScanRunState {
    pub confirmed: HashSet<MediaId>,
    pub reachable: HashSet<RootId>,
    pub unreachable: HashSet<RootId>,
    /// Unreadable subtrees of reachable roots, relative to the root
    pub unreadable: HashMap<RootId, Vec<String>>,
    pub summary: ScanSummary,
    last_reported_new: u64,
}

impl ScanRunState {
    fn new() -> Self {
        Self::default()
    }

    /// Whether cleanup may delete this entry
    fn is_removable(&self, entry: &MediaEntry) -> bool {
        if self.confirmed.contains(&entry.id) || !self.reachable.contains(&entry.root_id) {
            return false;
        }
        self.unreadable
            .get(&entry.root_id)
            .map(|prefixes| !RootListing::covers(prefixes, &entry.rel_path))
            .unwrap_or(true)
    }

    /// Whether the library-changed notification is due
    fn take_library_change(&mut self) -> bool {
        if self.summary.new != self.last_reported_new {
            self.last_reported_new = self.summary.new;
            true
        } else {
            false
        }
    }
}

/// Clears the running flag when a scan ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A candidate last seen as a copy of other content
#[derive(Debug, Clone)]
struct KnownDuplicate {
    mtime: i64,
    content_hash: String,
}

/// Synchronizes a library store with the configured roots
pub struct LibraryScanner<S: LibraryStore> {
    config: ScanConfig,
    store: Mutex<S>,
    extractor: MetadataExtractor,
    running: AtomicBool,
    /// Keyed by (root, relative path); spares re-hashing unchanged copies
    duplicates: Mutex<HashMap<(RootId, String), KnownDuplicate>>,
}

impl<S: LibraryStore> LibraryScanner<S> {
    /// Create a scanner probing durations with lofty
    pub fn new(config: ScanConfig, store: S) -> Self {
        Self::with_probe(config, store, Box::new(LoftyProbe))
    }

    pub fn with_probe(config: ScanConfig, store: S, probe: Box<dyn DurationProbe>) -> Self {
        let extractor = MetadataExtractor::new(probe, config.audio_extensions.clone());
        Self {
            config,
            store: Mutex::new(store),
            extractor,
            running: AtomicBool::new(false),
            duplicates: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Lock the store; each call is held only for a single operation during a scan
    pub fn store(&self) -> Result<MutexGuard<'_, S>, ScanError> {
        self.store
            .lock()
            .map_err(|_| ScanError::persistence("Library store lock poisoned"))
    }

    pub fn into_store(self) -> Result<S, ScanError> {
        self.store
            .into_inner()
            .map_err(|_| ScanError::persistence("Library store lock poisoned"))
    }

    fn known_duplicates(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<(RootId, String), KnownDuplicate>>, ScanError> {
        self.duplicates
            .lock()
            .map_err(|_| ScanError::persistence("Duplicate memo lock poisoned"))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Result<RunningGuard<'_>, ScanError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScanError::scan_in_progress())?;
        Ok(RunningGuard(&self.running))
    }

    /// Run a full scan.
    ///
    /// Per-candidate and per-root failures are recorded in the summary.
    /// Returns `Err` only when cancelled or when another scan is running;
    /// a cancelled scan never runs cleanup.
    pub fn scan(
        &self,
        cancel: &CancellationToken,
        observer: &dyn ScanObserver,
    ) -> Result<ScanSummary, ScanError> {
        let _guard = self.try_begin()?;
        let start = Instant::now();
        let mut state = ScanRunState::new();

        let candidates = self.list_roots(&mut state, cancel, observer)?;
        info!("Processing {} total files", candidates.len());
        state.summary.candidates = candidates.len() as u64;

        self.process_all(&candidates, &mut state, cancel, observer)?;
        self.cleanup(&mut state, observer);

        let mut summary = state.summary;
        let mut unreachable: Vec<RootId> = state.unreachable.into_iter().collect();
        unreachable.sort_unstable();
        summary.unreachable_roots = unreachable;
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scan complete: {} new, {} unchanged, {} skipped, {} removed in {}ms",
            summary.new, summary.unchanged, summary.skipped, summary.removed, summary.duration_ms
        );
        observer.report_status(ScanPhase::Done, "Scan complete", 100.0);
        observer.report_done(&summary);
        Ok(summary)
    }

    fn list_roots(
        &self,
        state: &mut ScanRunState,
        cancel: &CancellationToken,
        observer: &dyn ScanObserver,
    ) -> Result<Vec<MediaCandidate>, ScanError> {
        let roots = &self.config.roots;
        let mut candidates = Vec::new();

        for (i, root) in roots.iter().enumerate() {
            observer.report_status(
                ScanPhase::Listing,
                &format!("Listing folders ({} of {})", i + 1, roots.len()),
                percent(i, roots.len()),
            );

            info!("Searching path: {}", root.path.display());
            match list_candidates(root, &self.config) {
                Ok(listing) => {
                    info!(
                        "  => found {} files with valid extensions",
                        listing.candidates.len()
                    );
                    state.reachable.insert(root.id);
                    if !listing.unreadable.is_empty() {
                        state.summary.warnings.push(format!(
                            "{} unreadable path(s) under {}; entries beneath them were kept",
                            listing.unreadable.len(),
                            root.path.display()
                        ));
                        state.unreadable.insert(root.id, listing.unreadable);
                    }
                    candidates.extend(listing.candidates);
                }
                Err(e) => {
                    warn!("  => {} (path offline)", e.message);
                    state.unreachable.insert(root.id);
                }
            }

            if cancel.is_cancelled() {
                info!("Scan cancelled while listing");
                return Err(ScanError::cancelled());
            }
        }

        Ok(candidates)
    }

    fn process_all(
        &self,
        candidates: &[MediaCandidate],
        state: &mut ScanRunState,
        cancel: &CancellationToken,
        observer: &dyn ScanObserver,
    ) -> Result<(), ScanError> {
        let roots: HashMap<RootId, &Root> = self.config.roots.iter().map(|r| (r.id, r)).collect();
        let mut resolver = FolderConfigResolver::new(self.config.folder_config_name.clone());
        let total = candidates.len();

        for (i, candidate) in candidates.iter().enumerate() {
            let Some(root) = roots.get(&candidate.root_id) else {
                continue;
            };

            debug!("[{}/{}] {}", i + 1, total, candidate.path.display());
            observer.report_status(
                ScanPhase::Scanning,
                &format!("Scanning media ({} of {})", i + 1, total),
                percent(i + 1, total),
            );

            // (re)resolve only when the directory changes
            let folder = resolver.resolve(candidate.dir(), &root.path);

            match self.process_candidate(candidate, root, &folder.parser, state) {
                Ok(CandidateOutcome::Existing(id)) => {
                    state.summary.unchanged += 1;
                    state.confirmed.insert(id);
                }
                Ok(CandidateOutcome::Created(id)) => {
                    state.summary.new += 1;
                    state.confirmed.insert(id);
                }
                Err(e) => {
                    warn!("  => skipping {}: {}", candidate.path.display(), e.message);
                    state.summary.record_skip(&candidate.path, &e);
                }
            }

            if state.take_library_change() {
                observer.report_library_changed();
            }

            if cancel.is_cancelled() {
                info!("Scan cancelled after {} of {} files", i + 1, total);
                return Err(ScanError::cancelled());
            }
        }

        Ok(())
    }

    /// Dedup, extract and commit a single candidate
    pub fn process_candidate(
        &self,
        candidate: &MediaCandidate,
        root: &Root,
        rules: &ParseRules,
        state: &mut ScanRunState,
    ) -> Result<CandidateOutcome, ScanError> {
        let fast = FastIdentity::of(candidate, &root.path)?;

        let existing = self
            .store()?
            .search(&MediaFilter::by_path(fast.root_id, fast.rel_path.clone()))?;
        debug!("  => {} result(s) for existing media", existing.len());

        if let Some(entry) = existing
            .iter()
            .find(|e| fast.matches(e) && sidecar_present(candidate, e))
        {
            debug!("  => media is in library");
            return Ok(CandidateOutcome::Existing(entry.id));
        }
        // same path, different mtime: replaced once the new version is extracted
        let stale = existing.ids.clone();

        if let Some(original) = self.remembered_duplicate(&fast, state)? {
            debug!("  => still a copy of {}", original);
            return Err(ScanError::duplicate_content(candidate.path.clone(), &original));
        }

        // a duplicate is rejected before any probe
        let hashed = match self.content_group(candidate) {
            Some(group) => Some(self.strong_identity(candidate, &fast, group, state)?),
            None => None,
        };

        let media = self
            .extractor
            .extract(candidate, rules)
            .map_err(|e| e.with_path(&candidate.path))?;
        info!(
            "  => {} {} duration: {}",
            media.kind(),
            candidate.path.display(),
            format_duration(media.duration())
        );

        let content_hash = match hashed {
            Some((group, strong)) if group == media.group_paths(&candidate.path) => {
                Some(strong.0)
            }
            Some(_) => {
                // probing fell back to another sidecar type
                let group = media.group_paths(&candidate.path);
                let (_, strong) = self.strong_identity(candidate, &fast, group, state)?;
                Some(strong.0)
            }
            None => None,
        };

        let entry =
            NewMediaEntry::from_extracted(root.id, fast.rel_path, fast.mtime, media, content_hash);

        let committed = self.store()?.replace(&stale, &entry).and_then(check_id);
        let id = match committed {
            Ok(id) => id,
            Err(e) => {
                // keep the previous version; the next pass retries the changed file
                state.confirmed.extend(stale.iter().copied());
                return Err(e.with_path(&candidate.path));
            }
        };
        if !stale.is_empty() {
            info!("  => replaced {} outdated entry(s)", stale.len());
            state.summary.replaced += stale.len() as u64;
        }
        debug!("  => added as {}", id);
        Ok(CandidateOutcome::Created(id))
    }

    fn content_group(&self, candidate: &MediaCandidate) -> Option<Vec<PathBuf>> {
        if self.config.hash_policy.applies_to(candidate.kind) {
            self.extractor.content_group(candidate)
        } else {
            None
        }
    }

    fn strong_identity(
        &self,
        candidate: &MediaCandidate,
        fast: &FastIdentity,
        group: Vec<PathBuf>,
        state: &mut ScanRunState,
    ) -> Result<(Vec<PathBuf>, StrongIdentity), ScanError> {
        let strong = StrongIdentity::compute(&group)?;
        state.summary.hashed += 1;
        self.check_duplicate(candidate, fast, &strong, state)?;
        Ok((group, strong))
    }

    /// A copy seen on an earlier pass is rejected without hashing while it is
    /// unchanged and the content it duplicates is confirmed in this pass
    fn remembered_duplicate(
        &self,
        fast: &FastIdentity,
        state: &ScanRunState,
    ) -> Result<Option<String>, ScanError> {
        let key = (fast.root_id, fast.rel_path.clone());
        let known = self.known_duplicates()?.get(&key).cloned();
        let Some(known) = known else {
            return Ok(None);
        };
        if known.mtime != fast.mtime {
            self.known_duplicates()?.remove(&key);
            return Ok(None);
        }

        let matches = self.store()?.search(&MediaFilter::by_hash(known.content_hash))?;
        let found = matches
            .iter()
            .find(|e| state.confirmed.contains(&e.id))
            .map(|e| e.rel_path.clone());
        Ok(found)
    }

    fn check_duplicate(
        &self,
        candidate: &MediaCandidate,
        fast: &FastIdentity,
        strong: &StrongIdentity,
        state: &ScanRunState,
    ) -> Result<(), ScanError> {
        let matches = self.store()?.search(&MediaFilter::by_hash(strong.as_str()))?;
        for entry in matches.iter() {
            if state.confirmed.contains(&entry.id) {
                self.known_duplicates()?.insert(
                    (fast.root_id, fast.rel_path.clone()),
                    KnownDuplicate {
                        mtime: fast.mtime,
                        content_hash: strong.0.clone(),
                    },
                );
                return Err(ScanError::duplicate_content(candidate.path.clone(), &entry.rel_path));
            }
            debug!("  => same content as {} (moved or copied)", entry.rel_path);
        }
        Ok(())
    }

    fn cleanup(&self, state: &mut ScanRunState, observer: &dyn ScanObserver) {
        info!("Looking for orphaned media entries");
        observer.report_status(ScanPhase::Cleanup, "Cleaning up", 0.0);

        let all = match self.store().and_then(|s| s.search(&MediaFilter::all())) {
            Ok(all) => all,
            Err(e) => {
                warn!("Skipping cleanup: {}", e.message);
                state.summary.warnings.push(format!("Cleanup skipped: {}", e.message));
                return;
            }
        };

        let orphans: Vec<MediaId> = all
            .iter()
            .filter(|e| state.is_removable(e))
            .inspect(|e| info!("  => {}", e.rel_path))
            .map(|e| e.id)
            .collect();

        info!("Found {} orphaned media entries", orphans.len());

        if !orphans.is_empty() {
            match self.store().and_then(|mut s| s.remove(&orphans)) {
                Ok(()) => state.summary.removed = orphans.len() as u64,
                Err(e) => {
                    error!("Cleanup failed, stale entries remain: {}", e.message);
                    state.summary.warnings.push(format!(
                        "Failed to remove {} orphaned entries: {}",
                        orphans.len(),
                        e.message
                    ));
                }
            }
        }

        observer.report_status(ScanPhase::Cleanup, "Cleaning up", 100.0);
    }
}

/// A pair is only intact while its recorded audio sidecar still exists
fn sidecar_present(candidate: &MediaCandidate, entry: &MediaEntry) -> bool {
    match entry.kind {
        MediaKind::Video => true,
        MediaKind::Pair => entry
            .provider_meta
            .audio_ext
            .as_ref()
            .map(|ext| candidate.path.with_extension(ext).is_file())
            .unwrap_or(false),
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashPolicy;
    use crate::db::{SearchResult, SqliteLibrary};
    use crate::error::ScanErrorKind;
    use crate::models::ProviderMeta;
    use crate::progress::NullObserver;
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Probe with fixed durations by file name that counts its calls
    struct CountingProbe {
        durations: HashMap<String, f64>,
        calls: Arc<AtomicUsize>,
    }

    impl DurationProbe for CountingProbe {
        fn probe_duration(&self, path: &Path) -> Result<f64, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.durations
                .get(&name)
                .copied()
                .ok_or_else(|| ScanError::duration_unavailable(path.to_path_buf(), "unreadable"))
        }
    }

    fn probe(durations: &[(&str, f64)]) -> (Box<CountingProbe>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = CountingProbe {
            durations: durations.iter().map(|(n, d)| (n.to_string(), *d)).collect(),
            calls: Arc::clone(&calls),
        };
        (Box::new(probe), calls)
    }

    #[derive(Default)]
    struct RecordingObserver {
        statuses: RefCell<Vec<(ScanPhase, String, f64)>>,
        library_changes: Cell<u32>,
    }

    impl ScanObserver for RecordingObserver {
        fn report_status(&self, phase: ScanPhase, text: &str, percent: f64) {
            self.statuses.borrow_mut().push((phase, text.to_string(), percent));
        }

        fn report_library_changed(&self) {
            self.library_changes.set(self.library_changes.get() + 1);
        }
    }

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn config(roots: Vec<Root>) -> ScanConfig {
        ScanConfig::builder().roots(roots).build()
    }

    fn entries<S: LibraryStore>(scanner: &LibraryScanner<S>) -> SearchResult {
        scanner.store().unwrap().search(&MediaFilter::all()).unwrap()
    }

    fn find<'a>(all: &'a SearchResult, rel_path: &str) -> &'a MediaEntry {
        all.iter().find(|e| e.rel_path == rel_path).unwrap()
    }

    fn scan<S: LibraryStore>(scanner: &LibraryScanner<S>) -> ScanSummary {
        scanner.scan(&CancellationToken::new(), &NullObserver).unwrap()
    }

    /// Root directory named so its own name parses as "Artist - Title"
    fn music_root(tmp: &TempDir) -> PathBuf {
        let root = tmp.path().join("Queen - Track");
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn seeded_entry(root_id: RootId, rel_path: &str) -> NewMediaEntry {
        NewMediaEntry {
            root_id,
            rel_path: rel_path.to_string(),
            kind: MediaKind::Video,
            artist: None,
            title: rel_path.to_string(),
            duration: 60.0,
            mtime: 1,
            content_hash: None,
            provider_meta: ProviderMeta::default(),
        }
    }

    #[test]
    fn test_first_scan_rescan_and_delete() {
        let tmp = TempDir::new().unwrap();
        let root = music_root(&tmp);
        touch(&root.join("track.cdg"), b"graphics");
        touch(&root.join("track.mp3"), b"audio");
        touch(&root.join("other.mp4"), b"video");

        let (probe, calls) = probe(&[("track.mp3", 185.0), ("other.mp4", 210.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root.clone())]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );

        let first = scan(&scanner);
        assert_eq!((first.new, first.unchanged, first.skipped, first.removed), (2, 0, 0, 0));
        let all = entries(&scanner);
        let track = find(&all, "track.cdg").clone();
        assert_eq!(track.duration, 185.0);
        assert_eq!(track.artist.as_deref(), Some("Queen"));
        assert_eq!(track.provider_meta.audio_ext.as_deref(), Some("mp3"));
        assert!(track.content_hash.is_some());
        let other = find(&all, "other.mp4");
        assert_eq!(other.duration, 210.0);
        assert_eq!(other.title, "other");
        assert!(other.content_hash.is_none());

        // unchanged files: no probing, no hashing
        let probes_before = calls.load(Ordering::SeqCst);
        let second = scan(&scanner);
        assert_eq!((second.new, second.unchanged, second.removed), (0, 2, 0));
        assert_eq!(second.hashed, 0);
        assert_eq!(calls.load(Ordering::SeqCst), probes_before);
        assert_eq!(entries(&scanner).ids, all.ids);

        fs::remove_file(root.join("other.mp4")).unwrap();
        let third = scan(&scanner);
        assert_eq!((third.new, third.unchanged, third.removed), (0, 1, 1));
        let all = entries(&scanner);
        assert_eq!(all.len(), 1);
        assert_eq!(find(&all, "track.cdg"), &track);
    }

    #[test]
    fn test_unreachable_root_keeps_entries() {
        let tmp = TempDir::new().unwrap();
        let online = tmp.path().join("online");
        let offline = tmp.path().join("offline");
        touch(&online.join("a.mp4"), b"v");

        let mut db = SqliteLibrary::open_memory().unwrap();
        db.add(&seeded_entry(2, "kept.mp4")).unwrap();
        db.add(&seeded_entry(2, "also-kept.mp4")).unwrap();

        let (probe, _) = probe(&[("a.mp4", 30.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, online), Root::new(2, offline)]),
            db,
            probe,
        );

        let summary = scan(&scanner);
        assert_eq!(summary.new, 1);
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.unreachable_roots, vec![2]);
        assert!(!summary.is_clean());
        assert_eq!(entries(&scanner).len(), 3);
    }

    #[test]
    fn test_entries_of_unconfigured_roots_untouched() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("music");
        fs::create_dir_all(&root).unwrap();

        let mut db = SqliteLibrary::open_memory().unwrap();
        db.add(&seeded_entry(9, "elsewhere.mp4")).unwrap();
        db.add(&seeded_entry(1, "gone.mp4")).unwrap();

        let (probe, _) = probe(&[]);
        let scanner = LibraryScanner::with_probe(config(vec![Root::new(1, root)]), db, probe);

        let summary = scan(&scanner);
        assert_eq!(summary.removed, 1);
        let all = entries(&scanner);
        assert_eq!(all.len(), 1);
        assert_eq!(all.iter().next().unwrap().root_id, 9);
    }

    #[test]
    fn test_missing_sidecar_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = music_root(&tmp);
        touch(&root.join("lonely.cdg"), b"g");
        touch(&root.join("lonely.ogg"), b"a");

        let (probe, calls) = probe(&[("lonely.ogg", 100.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );

        let summary = scan(&scanner);
        assert_eq!(summary.new, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skipped_paths[0].reason, ScanErrorKind::MissingSidecar);
        assert!(summary.skipped_paths[0].path.ends_with("lonely.cdg"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(entries(&scanner).is_empty());
    }

    #[test]
    fn test_deleted_sidecar_removes_entry() {
        let tmp = TempDir::new().unwrap();
        let root = music_root(&tmp);
        touch(&root.join("track.cdg"), b"g");
        touch(&root.join("track.mp3"), b"a");

        let (probe, _) = probe(&[("track.mp3", 185.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root.clone())]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );
        assert_eq!(scan(&scanner).new, 1);

        fs::remove_file(root.join("track.mp3")).unwrap();
        let summary = scan(&scanner);
        assert_eq!((summary.new, summary.unchanged, summary.skipped), (0, 0, 1));
        assert_eq!(summary.skipped_paths[0].reason, ScanErrorKind::MissingSidecar);
        assert_eq!(summary.removed, 1);
        assert!(entries(&scanner).is_empty());
    }

    #[test]
    fn test_video_without_duration_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        touch(&root.join("broken.mp4"), b"v");
        touch(&root.join("zero.mp4"), b"v");

        let (probe, _) = probe(&[("zero.mp4", 0.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );

        let summary = scan(&scanner);
        assert_eq!(summary.skipped, 2);
        assert!(summary
            .skipped_paths
            .iter()
            .all(|s| s.reason == ScanErrorKind::DurationUnavailable));
        assert!(entries(&scanner).is_empty());
    }

    #[test]
    fn test_changed_file_replaces_entry() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        let clip = root.join("clip.mp4");
        touch(&clip, b"v1");

        let (probe, calls) = probe(&[("clip.mp4", 90.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );
        scan(&scanner);
        let before = entries(&scanner);

        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options().write(true).open(&clip).unwrap().set_modified(later).unwrap();

        let summary = scan(&scanner);
        assert_eq!((summary.new, summary.unchanged, summary.removed), (1, 0, 0));
        assert_eq!(summary.replaced, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let after = entries(&scanner);
        assert_eq!(after.len(), 1);
        assert_ne!(after.ids, before.ids);
        assert_ne!(find(&after, "clip.mp4").mtime, find(&before, "clip.mp4").mtime);
    }

    #[test]
    fn test_duplicate_content_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("karaoke");
        for name in ["A - Song", "B - Song"] {
            touch(&root.join(format!("{}.cdg", name)), b"same graphics");
            touch(&root.join(format!("{}.mp3", name)), b"same audio");
        }
        let durations = [("A - Song.mp3", 100.0), ("B - Song.mp3", 100.0)];

        let (probe_a, calls) = probe(&durations);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root.clone())]),
            SqliteLibrary::open_memory().unwrap(),
            probe_a,
        );
        let summary = scan(&scanner);
        assert_eq!((summary.new, summary.skipped, summary.hashed), (1, 1, 2));
        assert_eq!(summary.skipped_paths[0].reason, ScanErrorKind::DuplicateContent);
        assert_eq!(find(&entries(&scanner), "A - Song.cdg").artist.as_deref(), Some("A"));
        // the copy is rejected on its hash alone
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // an unchanged copy is neither probed nor hashed again
        let summary = scan(&scanner);
        assert_eq!((summary.unchanged, summary.skipped, summary.hashed), (1, 1, 0));
        assert_eq!(summary.skipped_paths[0].reason, ScanErrorKind::DuplicateContent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // touching the copy forgets it, so it is hashed once more
        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(root.join("B - Song.cdg"))
            .unwrap()
            .set_modified(later)
            .unwrap();
        let summary = scan(&scanner);
        assert_eq!((summary.skipped, summary.hashed), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // without strong identity both are kept
        let (probe_b, _) = probe(&durations);
        let scanner = LibraryScanner::with_probe(
            ScanConfig::builder()
                .add_root(Root::new(1, root))
                .hash_policy(HashPolicy::Never)
                .build(),
            SqliteLibrary::open_memory().unwrap(),
            probe_b,
        );
        let summary = scan(&scanner);
        assert_eq!((summary.new, summary.skipped, summary.hashed), (2, 0, 0));
    }

    #[test]
    fn test_folder_config_applies_to_subtree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("karaoke");
        let reversed = root.join("Reversed");
        touch(&reversed.join("Song Title - The Artist.cdg"), b"g");
        touch(&reversed.join("Song Title - The Artist.mp3"), b"a");
        touch(&root.join("The Artist - Other Song.cdg"), b"g2");
        touch(&root.join("The Artist - Other Song.mp3"), b"a2");
        fs::write(
            reversed.join("media-sync.toml"),
            "[parser]\nartist_on_left = false\n",
        )
        .unwrap();

        let (probe, _) = probe(&[
            ("Song Title - The Artist.mp3", 120.0),
            ("The Artist - Other Song.mp3", 130.0),
        ]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );
        assert_eq!(scan(&scanner).new, 2);

        let all = entries(&scanner);
        let reversed = find(&all, "Reversed/Song Title - The Artist.cdg");
        assert_eq!(reversed.artist.as_deref(), Some("The Artist"));
        assert_eq!(reversed.title, "Song Title");
        let normal = find(&all, "The Artist - Other Song.cdg");
        assert_eq!(normal.artist.as_deref(), Some("The Artist"));
        assert_eq!(normal.title, "Other Song");
    }

    #[test]
    fn test_library_changed_is_debounced() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        touch(&root.join("a.mp4"), b"a");
        touch(&root.join("b.mp4"), b"b");
        touch(&root.join("c.mp4"), b"c");

        let (probe, _) = probe(&[("a.mp4", 10.0), ("c.mp4", 10.0)]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );

        let observer = RecordingObserver::default();
        scanner.scan(&CancellationToken::new(), &observer).unwrap();
        assert_eq!(observer.library_changes.get(), 2);

        let statuses = observer.statuses.borrow();
        assert_eq!(statuses[0].1, "Listing folders (1 of 1)");
        let scanning: Vec<f64> = statuses
            .iter()
            .filter(|s| s.0 == ScanPhase::Scanning)
            .map(|s| s.2)
            .collect();
        assert_eq!(scanning.len(), 3);
        assert!(scanning.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(statuses.last().unwrap().0, ScanPhase::Done);
        drop(statuses);

        let observer = RecordingObserver::default();
        scanner.scan(&CancellationToken::new(), &observer).unwrap();
        assert_eq!(observer.library_changes.get(), 0);
    }

    /// Probe that cancels the scan the first time it is called
    struct CancellingProbe(CancellationToken);

    impl DurationProbe for CancellingProbe {
        fn probe_duration(&self, _path: &Path) -> Result<f64, ScanError> {
            self.0.cancel();
            Ok(42.0)
        }
    }

    #[test]
    fn test_cancel_skips_cleanup() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        touch(&root.join("a.mp4"), b"a");
        touch(&root.join("b.mp4"), b"b");

        let mut db = SqliteLibrary::open_memory().unwrap();
        db.add(&seeded_entry(1, "deleted-long-ago.mp4")).unwrap();

        let cancel = CancellationToken::new();
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            db,
            Box::new(CancellingProbe(cancel.clone())),
        );

        let err = scanner.scan(&cancel, &NullObserver).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Cancelled);
        assert!(!scanner.is_running());

        // a.mp4 was committed, b.mp4 never processed, orphan not removed
        let all = entries(&scanner);
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|e| e.rel_path == "deleted-long-ago.mp4"));
        assert!(all.iter().any(|e| e.rel_path == "a.mp4"));
    }

    #[test]
    fn test_cancel_before_start() {
        let tmp = TempDir::new().unwrap();
        let (probe, calls) = probe(&[]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, tmp.path().to_path_buf())]),
            SqliteLibrary::open_memory().unwrap(),
            probe,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scanner.scan(&cancel, &NullObserver).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Probe that parks until released, so a scan can be held open
    struct BlockingProbe {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DurationProbe for BlockingProbe {
        fn probe_duration(&self, _path: &Path) -> Result<f64, ScanError> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(5.0)
        }
    }

    #[test]
    fn test_concurrent_scan_rejected() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        touch(&root.join("a.mp4"), b"a");

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            SqliteLibrary::open_memory().unwrap(),
            Box::new(BlockingProbe {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
        );

        std::thread::scope(|s| {
            let first = s.spawn(|| scanner.scan(&CancellationToken::new(), &NullObserver));

            entered_rx.recv().unwrap();
            assert!(scanner.is_running());
            let err = scanner.scan(&CancellationToken::new(), &NullObserver).unwrap_err();
            assert_eq!(err.kind, ScanErrorKind::ScanInProgress);

            release_tx.send(()).unwrap();
            let summary = first.join().unwrap().unwrap();
            assert_eq!(summary.new, 1);
        });

        assert!(!scanner.is_running());
    }

    /// Store whose batch removal always fails
    struct NoRemoveStore(SqliteLibrary);

    impl LibraryStore for NoRemoveStore {
        fn search(&self, filter: &MediaFilter) -> Result<SearchResult, ScanError> {
            self.0.search(filter)
        }

        fn add(&mut self, entry: &NewMediaEntry) -> Result<MediaId, ScanError> {
            self.0.add(entry)
        }

        fn remove(&mut self, _ids: &[MediaId]) -> Result<(), ScanError> {
            Err(ScanError::persistence("disk full"))
        }

        fn replace(
            &mut self,
            stale: &[MediaId],
            entry: &NewMediaEntry,
        ) -> Result<MediaId, ScanError> {
            self.0.replace(stale, entry)
        }
    }

    #[test]
    fn test_failed_cleanup_is_a_warning() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        fs::create_dir_all(&root).unwrap();

        let mut db = SqliteLibrary::open_memory().unwrap();
        db.add(&seeded_entry(1, "stale.mp4")).unwrap();

        let (probe, _) = probe(&[]);
        let scanner = LibraryScanner::with_probe(
            config(vec![Root::new(1, root)]),
            NoRemoveStore(db),
            probe,
        );

        let summary = scan(&scanner);
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.warnings[0].contains("disk full"));
        assert_eq!(entries(&scanner).len(), 1);
    }

    /// Store that refuses `bad*` entries and hands back id 0 for `zero*`
    struct RefusingStore(SqliteLibrary);

    impl LibraryStore for RefusingStore {
        fn search(&self, filter: &MediaFilter) -> Result<SearchResult, ScanError> {
            self.0.search(filter)
        }

        fn add(&mut self, entry: &NewMediaEntry) -> Result<MediaId, ScanError> {
            self.0.add(entry)
        }

        fn remove(&mut self, ids: &[MediaId]) -> Result<(), ScanError> {
            self.0.remove(ids)
        }

        fn replace(
            &mut self,
            stale: &[MediaId],
            entry: &NewMediaEntry,
        ) -> Result<MediaId, ScanError> {
            if entry.rel_path.starts_with("bad") {
                return Err(ScanError::persistence("disk full"));
            }
            if entry.rel_path.starts_with("zero") {
                return Ok(0);
            }
            self.0.replace(stale, entry)
        }
    }

    #[test]
    fn test_failed_commit_skips_candidate_and_keeps_old_entry() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        touch(&root.join("bad.mp4"), b"changed");
        touch(&root.join("c.mp4"), b"c");
        touch(&root.join("zero.mp4"), b"z");

        let mut db = SqliteLibrary::open_memory().unwrap();
        let old = db.add(&seeded_entry(1, "bad.mp4")).unwrap();

        let (probe, _) = probe(&[("bad.mp4", 10.0), ("c.mp4", 10.0), ("zero.mp4", 10.0)]);
        let scanner =
            LibraryScanner::with_probe(config(vec![Root::new(1, root)]), RefusingStore(db), probe);

        let summary = scan(&scanner);
        assert_eq!((summary.new, summary.skipped, summary.removed), (1, 2, 0));
        assert_eq!(summary.replaced, 0);
        let reasons: Vec<_> = summary.skipped_paths.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![ScanErrorKind::PersistenceFailure, ScanErrorKind::InvalidId]
        );
        assert!(summary.skipped_paths[0].path.ends_with("bad.mp4"));

        // the outdated entry survives cleanup and is retried next time
        let all = entries(&scanner);
        assert_eq!(all.len(), 2);
        assert_eq!(find(&all, "bad.mp4").id, old);
        assert_eq!(find(&all, "bad.mp4").mtime, 1);
        assert!(all.iter().any(|e| e.rel_path == "c.mp4"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subtree_keeps_root_and_its_entries() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("videos");
        touch(&root.join("new/fresh.mp4"), b"v");
        std::os::unix::fs::symlink(tmp.path().join("nowhere"), root.join("stale-link")).unwrap();

        let mut db = SqliteLibrary::open_memory().unwrap();
        db.add(&seeded_entry(1, "stale-link/old.mp4")).unwrap();
        db.add(&seeded_entry(1, "gone.mp4")).unwrap();

        let (probe, _) = probe(&[("fresh.mp4", 30.0)]);
        let scanner = LibraryScanner::with_probe(config(vec![Root::new(1, root)]), db, probe);

        let summary = scan(&scanner);
        assert_eq!(summary.candidates, 1);
        assert_eq!((summary.new, summary.removed), (1, 1));
        assert!(summary.unreachable_roots.is_empty());
        assert_eq!(summary.warnings.len(), 1);

        let all = entries(&scanner);
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|e| e.rel_path == "new/fresh.mp4"));
        assert!(all.iter().any(|e| e.rel_path == "stale-link/old.mp4"));
    }

    #[test]
    fn test_run_state_library_change() {
        let mut state = ScanRunState::new();
        assert!(!state.take_library_change());
        state.summary.new = 1;
        assert!(state.take_library_change());
        assert!(!state.take_library_change());
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(4, 4), 100.0);
    }
}
