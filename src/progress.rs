//! Scan progress side channel
//!
//! The reconciler pushes coarse status (phase, percent) and library-changed
//! notifications to a `ScanObserver`. `ProgressReporter` writes them to
//! stderr as JSON lines for an external process to consume.

use serde::Serialize;
use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::models::ScanSummary;

/// Stage of a scan, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    /// Listing configured roots
    #[default]
    Listing,
    /// Processing discovered candidates
    Scanning,
    /// Removing orphaned entries
    Cleanup,
    /// Summary is final
    Done,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Listing => "listing",
            ScanPhase::Scanning => "scanning",
            ScanPhase::Cleanup => "cleanup",
            ScanPhase::Done => "done",
        }
    }
}

/// Receiver of scan progress; a side channel, never part of the result
pub trait ScanObserver {
    /// `percent` is in 0..=100 and monotonic within a phase
    fn report_status(&self, phase: ScanPhase, text: &str, percent: f64);

    /// At least one new entry was committed since the last call
    fn report_library_changed(&self);

    fn report_done(&self, _summary: &ScanSummary) {}
}

/// Observer that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ScanObserver for NullObserver {
    fn report_status(&self, _phase: ScanPhase, _text: &str, _percent: f64) {}

    fn report_library_changed(&self) {}
}

/// Status message sent during scan
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    /// Milliseconds since the reporter was created
    pub ts: u64,
    pub phase: ScanPhase,
    pub text: String,
    pub pct: f64,
}

impl StatusMessage {
    pub fn new(seq: u64, ts: u64, phase: ScanPhase, text: String, pct: f64) -> Self {
        Self {
            msg_type: "status",
            seq,
            ts,
            phase,
            text,
            pct,
        }
    }
}

/// Sent when the library gained entries
#[derive(Debug, Clone, Serialize)]
pub struct LibraryChangedMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
}

impl LibraryChangedMessage {
    pub fn new(seq: u64, ts: u64) -> Self {
        Self {
            msg_type: "library",
            seq,
            ts,
        }
    }
}

/// Final counts of a finished scan
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    #[serde(rename = "nw")]
    pub new: u64,
    #[serde(rename = "ok")]
    pub unchanged: u64,
    #[serde(rename = "sk")]
    pub skipped: u64,
    #[serde(rename = "rm")]
    pub removed: u64,
    /// Wall time of the whole scan
    pub ms: u64,
}

impl DoneMessage {
    pub fn new(seq: u64, ts: u64, summary: &ScanSummary) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            new: summary.new,
            unchanged: summary.unchanged,
            skipped: summary.skipped,
            removed: summary.removed,
            ms: summary.duration_ms,
        }
    }
}

/// Writes observer events to stderr as one JSON object per line
///
/// Status messages are throttled to `interval_ms`, except the first message
/// of each phase and completion (100%) which always go out.
pub struct ProgressReporter {
    enabled: bool,
    interval_ms: u64,
    last_report: Cell<Instant>,
    last_phase: Cell<Option<ScanPhase>>,
    seq: AtomicU64,
    start_time: Instant,
}

impl ProgressReporter {
    /// A disabled reporter swallows every event; `interval_ms` is the
    /// minimum gap between two status lines of the same phase.
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            interval_ms,
            last_report: Cell::new(now),
            last_phase: Cell::new(None),
            seq: AtomicU64::new(0),
            start_time: now,
        }
    }

    /// Whether a status message for `phase` at `percent` should go out now
    pub fn should_report(&self, phase: ScanPhase, percent: f64) -> bool {
        if !self.enabled {
            return false;
        }
        if self.last_phase.get() != Some(phase) || percent >= 100.0 {
            return true;
        }
        let elapsed = self.last_report.get().elapsed().as_millis() as u64;
        elapsed >= self.interval_ms
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            eprintln!("{}", json);
            std::io::stderr().flush().ok();
        }
    }
}

impl ScanObserver for ProgressReporter {
    fn report_status(&self, phase: ScanPhase, text: &str, percent: f64) {
        if !self.should_report(phase, percent) {
            return;
        }

        let msg = StatusMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            phase,
            text.to_string(),
            percent.clamp(0.0, 100.0),
        );
        self.output_to_stderr(&msg);
        self.last_report.set(Instant::now());
        self.last_phase.set(Some(phase));
    }

    fn report_library_changed(&self) {
        if !self.enabled {
            return;
        }
        let msg = LibraryChangedMessage::new(self.next_seq(), self.current_timestamp());
        self.output_to_stderr(&msg);
    }

    fn report_done(&self, summary: &ScanSummary) {
        if !self.enabled {
            return;
        }
        let msg = DoneMessage::new(self.next_seq(), self.current_timestamp(), summary);
        self.output_to_stderr(&msg);
    }
}
