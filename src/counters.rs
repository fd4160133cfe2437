//! State shared by the workers of a benchmark phase.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// The kinds of phase a benchmark repetition goes through, in order.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PhaseKind {
    /// Write new objects until the phase deadline.
    Upload,

    /// Read random existing objects until the phase deadline.
    Download,

    /// Delete every object written by the preceding upload phase.
    Delete,
}

impl PhaseKind {
    /// All phases, in the order they run.
    pub const ALL: [PhaseKind; 3] = [PhaseKind::Upload, PhaseKind::Download, PhaseKind::Delete];

    /// HTTP method used by the phase, as used in reports.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Upload => "PUT",
            Self::Download => "GET",
            Self::Delete => "DELETE",
        }
    }

    /// Is the phase bounded by a deadline, rather than by object count?
    pub fn is_timed(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// Counters and timestamps updated concurrently by workers.
///
/// Every field is only ever changed atomically. The operation counters
/// only grow within a phase, and each call to `next_*` hands out a
/// different sequence number, with no gaps. The finish timestamp of a
/// phase is written by the worker that brings the active worker count
/// to zero.
#[derive(Debug)]
pub struct SharedCounters {
    base: Instant,
    uploads: AtomicU64,
    downloads: AtomicU64,
    deletes: AtomicU64,
    active_workers: AtomicUsize,
    upload_finish: AtomicU64,
    download_finish: AtomicU64,
    delete_finish: AtomicU64,
    aborted: AtomicBool,
}

impl Default for SharedCounters {
    fn default() -> Self {
        Self {
            base: Instant::now(),
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            upload_finish: AtomicU64::new(0),
            download_finish: AtomicU64::new(0),
            delete_finish: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
        }
    }
}

impl SharedCounters {
    /// Create a new set of counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare the counters for a new phase with a number of workers.
    ///
    /// An upload phase starts a new population of objects, so it
    /// resets every operation counter. Download and delete phases only
    /// reset their own counter: they need the upload count of the
    /// preceding upload phase.
    pub fn begin_phase(&self, kind: PhaseKind, workers: usize) {
        match kind {
            PhaseKind::Upload => {
                self.uploads.store(0, Ordering::SeqCst);
                self.downloads.store(0, Ordering::SeqCst);
                self.deletes.store(0, Ordering::SeqCst);
            }
            PhaseKind::Download => self.downloads.store(0, Ordering::SeqCst),
            PhaseKind::Delete => self.deletes.store(0, Ordering::SeqCst),
        }
        self.finish_slot(kind).store(0, Ordering::Release);
        self.aborted.store(false, Ordering::SeqCst);
        self.active_workers.store(workers, Ordering::SeqCst);
    }

    /// Claim the next upload sequence number, starting at 1.
    pub fn next_upload(&self) -> u64 {
        self.uploads.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count one more download and return the download count.
    pub fn next_download(&self) -> u64 {
        self.downloads.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Claim the next delete sequence number, starting at 1.
    pub fn next_delete(&self) -> u64 {
        self.deletes.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of uploads issued in the current repetition.
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of downloads issued in the current phase.
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of delete sequence numbers claimed in the current phase.
    ///
    /// This overshoots the number of deletes issued, because every
    /// worker claims one number past the end before it stops.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of operations a phase has issued.
    pub fn operations(&self, kind: PhaseKind) -> u64 {
        match kind {
            PhaseKind::Upload => self.uploads(),
            PhaseKind::Download => self.downloads(),
            PhaseKind::Delete => self.deletes().min(self.uploads()),
        }
    }

    /// Number of workers that haven't exited the current phase.
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Record that a worker has exited the phase.
    ///
    /// Returns true for the worker that was the last one to exit. That
    /// worker also records the finish time of the phase.
    pub fn worker_exited(&self, kind: PhaseKind) -> bool {
        let before = self.active_workers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(before > 0, "more workers exited than were started");
        if before == 1 {
            let nanos = self.base.elapsed().as_nanos().max(1) as u64;
            self.finish_slot(kind).store(nanos, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// When did the last worker of a phase exit, if it has?
    pub fn finish_time(&self, kind: PhaseKind) -> Option<Instant> {
        match self.finish_slot(kind).load(Ordering::Acquire) {
            0 => None,
            nanos => Some(self.base + Duration::from_nanos(nanos)),
        }
    }

    /// Ask every worker of the current phase to stop.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Has the current phase been aborted?
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn finish_slot(&self, kind: PhaseKind) -> &AtomicU64 {
        match kind {
            PhaseKind::Upload => &self.upload_finish,
            PhaseKind::Download => &self.download_finish,
            PhaseKind::Delete => &self.delete_finish,
        }
    }
}
