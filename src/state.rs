//! Sort progress and cancellation.
//!
//! [`SortState`] is shared between the sorting thread and any number of observers. Observers may read the
//! progress at any time and request cancellation; the sorting thread only looks at a cancellation request at
//! fixed checkpoints.

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Sorting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading input and writing sorted runs.
    PreSorting,
    /// Merging sorted runs.
    Sorting,
    /// Result is ready to be consumed.
    Complete,
}

const PHASE_UNSET: u8 = 0;
const PHASE_PRE_SORTING: u8 = 1;
const PHASE_SORTING: u8 = 2;
const PHASE_COMPLETE: u8 = 3;

/// Cause captured by [`SortState::cancel_with`].
pub type CancelCause = Box<dyn Error + Send + Sync>;

/// Progress of the current sort invocation plus its cancellation token.
#[derive(Debug)]
pub struct SortState {
    phase: AtomicU8,
    presort_run_count: AtomicUsize,
    current_merge_round: AtomicIsize,
    total_merge_rounds: AtomicIsize,
    cancel_requested: AtomicBool,
    cancel_cause: Mutex<Option<CancelCause>>,
}

impl SortState {
    pub fn new() -> Self {
        SortState {
            phase: AtomicU8::new(PHASE_UNSET),
            presort_run_count: AtomicUsize::new(0),
            current_merge_round: AtomicIsize::new(-1),
            total_merge_rounds: AtomicIsize::new(-1),
            cancel_requested: AtomicBool::new(false),
            cancel_cause: Mutex::new(None),
        }
    }

    /// Current phase, [`None`] before the first sort invocation started.
    pub fn phase(&self) -> Option<Phase> {
        match self.phase.load(Ordering::Acquire) {
            PHASE_PRE_SORTING => Some(Phase::PreSorting),
            PHASE_SORTING => Some(Phase::Sorting),
            PHASE_COMPLETE => Some(Phase::Complete),
            _ => None,
        }
    }

    pub fn is_pre_sorting(&self) -> bool {
        self.phase() == Some(Phase::PreSorting)
    }

    pub fn is_sorting(&self) -> bool {
        self.phase() == Some(Phase::Sorting)
    }

    pub fn is_completed(&self) -> bool {
        self.phase() == Some(Phase::Complete)
    }

    /// Number of sorted runs written during presorting. Zero if the input was sorted in memory.
    pub fn presort_run_count(&self) -> usize {
        self.presort_run_count.load(Ordering::Acquire)
    }

    /// Zero-based index of the merge round in progress, `-1` before merging started.
    pub fn current_merge_round(&self) -> isize {
        self.current_merge_round.load(Ordering::Acquire)
    }

    /// Number of merge rounds needed, including the final one. `-1` until presorting is done.
    pub fn total_merge_rounds(&self) -> isize {
        self.total_merge_rounds.load(Ordering::Acquire)
    }

    /// Requests cancellation. The sort stops at its next checkpoint and reports no result.
    pub fn cancel(&self) {
        let mut cause = self.lock_cause();
        *cause = None;
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Requests cancellation with a cause. The sort stops at its next checkpoint and fails with the cause.
    pub fn cancel_with(&self, cause: impl Into<CancelCause>) {
        let cause = cause.into();
        let mut slot = self.lock_cause();
        *slot = Some(cause);
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Consumes a pending cancellation request. The outer option tells whether one was pending.
    ///
    /// The flag and the cause are only written while the cause lock is held, so a request is always consumed
    /// together with its cause.
    pub(crate) fn take_cancel_request(&self) -> Option<Option<CancelCause>> {
        let mut cause = self.lock_cause();
        if !self.cancel_requested.load(Ordering::Acquire) {
            return None;
        }

        self.cancel_requested.store(false, Ordering::Release);
        Some(cause.take())
    }

    pub(crate) fn start(&self) {
        self.presort_run_count.store(0, Ordering::Release);
        self.current_merge_round.store(-1, Ordering::Release);
        self.total_merge_rounds.store(-1, Ordering::Release);
        self.phase.store(PHASE_PRE_SORTING, Ordering::Release);
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        let value = match phase {
            Phase::PreSorting => PHASE_PRE_SORTING,
            Phase::Sorting => PHASE_SORTING,
            Phase::Complete => PHASE_COMPLETE,
        };
        self.phase.store(value, Ordering::Release);
    }

    pub(crate) fn add_presort_run(&self) {
        self.presort_run_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn start_merging(&self, total_rounds: usize) {
        self.total_merge_rounds
            .store(isize::try_from(total_rounds).unwrap_or(isize::MAX), Ordering::Release);
        self.current_merge_round.store(0, Ordering::Release);
    }

    pub(crate) fn complete_merge_round(&self) {
        self.current_merge_round.fetch_add(1, Ordering::AcqRel);
    }

    fn lock_cause(&self) -> std::sync::MutexGuard<'_, Option<CancelCause>> {
        self.cancel_cause.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SortState {
    fn default() -> Self {
        SortState::new()
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::sync::Arc;
    use std::thread;

    use super::{Phase, SortState};

    #[test]
    fn test_progress() {
        let state = SortState::new();
        assert_eq!(state.phase(), None);

        state.start();
        assert!(state.is_pre_sorting());
        assert_eq!(state.total_merge_rounds(), -1);
        state.add_presort_run();
        state.add_presort_run();

        state.set_phase(Phase::Sorting);
        state.start_merging(2);
        state.complete_merge_round();
        assert!(state.is_sorting());
        assert_eq!(state.presort_run_count(), 2);
        assert_eq!(state.current_merge_round(), 1);
        assert_eq!(state.total_merge_rounds(), 2);

        state.start();
        assert_eq!(state.presort_run_count(), 0);
        assert_eq!(state.current_merge_round(), -1);
    }

    #[test]
    fn test_cancel_is_consumed() {
        let state = SortState::new();
        assert!(state.take_cancel_request().is_none());

        state.cancel();
        assert!(state.is_cancel_requested());
        assert!(matches!(state.take_cancel_request(), Some(None)));
        assert!(!state.is_cancel_requested());
        assert!(state.take_cancel_request().is_none());
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let state = Arc::new(SortState::new());

        let remote = Arc::clone(&state);
        thread::spawn(move || remote.cancel_with(io::Error::new(io::ErrorKind::Other, "disk full")))
            .join()
            .unwrap();

        match state.take_cancel_request() {
            Some(Some(cause)) => assert_eq!(cause.to_string(), "disk full"),
            _ => panic!("cancellation with a cause expected"),
        }
    }

    #[test]
    fn test_cause_consumed_with_its_request() {
        let state = Arc::new(SortState::new());

        let cancellers = Vec::from_iter((0..4).map(|_| {
            let remote = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    remote.cancel_with("shutting down");
                }
            })
        }));

        let check = || match state.take_cancel_request() {
            Some(None) => panic!("request consumed without its cause"),
            _ => {}
        };
        while cancellers.iter().any(|canceller| !canceller.is_finished()) {
            check();
        }
        for canceller in cancellers {
            canceller.join().unwrap();
        }
        check();
        assert!(state.take_cancel_request().is_none());
    }
}
