//! Reconciliation epochs.
//!
//! A reconcile pass is stamped with an [`Epoch`]. Nodes remember the last
//! epoch they reconciled for, which makes a second pull in the same pass free.
//! Epochs only need to increase between passes; an [`EpochClock`] hands out
//! monotonically increasing ones.

use std::sync::atomic::{AtomicU64, Ordering};

/// A reconcile pass number.
pub type Epoch = u64;

/// Monotonic epoch source shared by everyone driving the same graph.
#[derive(Debug, Default)]
pub struct EpochClock {
    last: AtomicU64,
}

impl EpochClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new pass. The first epoch handed out is 1.
    pub fn advance(&self) -> Epoch {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The most recent epoch handed out, or 0 if none has been.
    pub fn current(&self) -> Epoch {
        self.last.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_increase() {
        let clock = EpochClock::new();
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current(), 2);
    }
}
