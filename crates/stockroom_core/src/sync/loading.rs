//! Process-wide busy flag with scoped release.
//!
//! # Responsibility
//! - Block conflicting UI interaction while a load or mutation is in flight.
//! - Tie every `true` transition to a guard whose drop is the `false` transition.
//!
//! # Invariants
//! - At most one `LoadingGuard` exists per flag at any time.
//! - The flag is `true` exactly while that guard is alive.
//! - Every acquisition is matched by exactly one release, on every exit path.

use log::debug;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Operation holding the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingReason {
    InitialLoad,
    Commit,
    Delete,
}

impl Display for LoadingReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InitialLoad => "initial_load",
            Self::Commit => "commit",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
struct FlagState {
    busy: AtomicBool,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Shared handle to the loading flag; clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct LoadingFlag {
    state: Arc<FlagState>,
}

impl LoadingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.state.busy.load(Ordering::Acquire)
    }

    /// Sets the flag, or returns `None` when another operation holds it.
    pub fn try_acquire(&self, reason: LoadingReason) -> Option<LoadingGuard> {
        self.state
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.state.acquired.fetch_add(1, Ordering::Relaxed);
        debug!("event=loading_acquired module=sync reason={reason}");
        Some(LoadingGuard {
            state: Arc::clone(&self.state),
            reason,
        })
    }

    /// Number of acquisitions and releases so far.
    pub fn transitions(&self) -> (u64, u64) {
        (
            self.state.acquired.load(Ordering::Relaxed),
            self.state.released.load(Ordering::Relaxed),
        )
    }
}

/// Proof that the flag is held; dropping it clears the flag.
#[derive(Debug)]
#[must_use = "dropping the guard immediately clears the loading flag"]
pub struct LoadingGuard {
    state: Arc<FlagState>,
    reason: LoadingReason,
}

impl LoadingGuard {
    pub fn reason(&self) -> LoadingReason {
        self.reason
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
        self.state.released.fetch_add(1, Ordering::Relaxed);
        debug!("event=loading_released module=sync reason={}", self.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadingFlag, LoadingReason};

    #[test]
    fn guard_sets_and_clears_flag() {
        let flag = LoadingFlag::new();
        assert!(!flag.is_loading());

        let guard = flag.try_acquire(LoadingReason::Commit).expect("flag should be free");
        assert!(flag.is_loading());
        assert_eq!(guard.reason(), LoadingReason::Commit);

        drop(guard);
        assert!(!flag.is_loading());
        assert_eq!(flag.transitions(), (1, 1));
    }

    #[test]
    fn second_acquire_is_rejected_while_held() {
        let flag = LoadingFlag::new();
        let _guard = flag.try_acquire(LoadingReason::Delete).expect("flag should be free");

        assert!(flag.clone().try_acquire(LoadingReason::Commit).is_none());
        assert_eq!(flag.transitions(), (1, 0));
    }
}
