use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// No primary is currently known.
pub const NO_PRIMARY: i64 = -1;

/// Global routing state shared between the primary selector and the accept
/// dispatcher. `primary_index` is published with `Release` and observed
/// with `Acquire`/`Relaxed` so that an accept which reads a given index is
/// guaranteed to see the epoch that was current when that index was
/// written (spec §4.1 / §5 ordering guarantees) — `epoch` itself only needs
/// `Relaxed` fetch-add because it is always read *after* the acquire load
/// of `primary_index` in the same sample.
#[derive(Debug)]
pub struct RoutingState {
    primary_index: AtomicI64,
    epoch: AtomicU64,
}

/// A single consistent sample of the routing state taken by the accept
/// dispatcher for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSample {
    pub primary_index: i64,
    pub epoch: u64,
}

impl RoutingSample {
    pub fn has_primary(&self) -> bool {
        self.primary_index != NO_PRIMARY
    }
}

impl Default for RoutingState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingState {
    pub fn new() -> Self {
        Self {
            primary_index: AtomicI64::new(NO_PRIMARY),
            epoch: AtomicU64::new(0),
        }
    }

    /// Take one logical sample: (primary_index, epoch). The acquire load on
    /// `primary_index` pairs with the release store in `publish`, making
    /// the subsequent relaxed load of `epoch` consistent with that index.
    pub fn sample(&self) -> RoutingSample {
        let primary_index = self.primary_index.load(Ordering::Acquire);
        let epoch = self.epoch.load(Ordering::Relaxed);
        RoutingSample { primary_index, epoch }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Publish a new primary index if it differs from the currently
    /// published one, bumping the epoch. Returns the new epoch if a change
    /// was published, `None` if the scan result matched what was already
    /// published (spec §4.1 Publication).
    pub fn publish_if_changed(&self, new_index: i64) -> Option<u64> {
        let current = self.primary_index.load(Ordering::Acquire);
        if current == new_index {
            return None;
        }
        self.primary_index.store(new_index, Ordering::Release);
        let new_epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        Some(new_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_change_publishes_nothing() {
        let state = RoutingState::new();
        assert_eq!(state.publish_if_changed(NO_PRIMARY), None);
    }

    #[test]
    fn change_bumps_epoch_once() {
        let state = RoutingState::new();
        assert_eq!(state.publish_if_changed(0), Some(1));
        let sample = state.sample();
        assert_eq!(sample.primary_index, 0);
        assert_eq!(sample.epoch, 1);

        // Same index again: no-op.
        assert_eq!(state.publish_if_changed(0), None);
        assert_eq!(state.current_epoch(), 1);

        // New primary: epoch advances again.
        assert_eq!(state.publish_if_changed(1), Some(2));
    }

    #[test]
    fn transition_to_and_from_no_primary_bumps_epoch() {
        let state = RoutingState::new();
        state.publish_if_changed(0);
        assert_eq!(state.publish_if_changed(NO_PRIMARY), Some(2));
        assert!(!state.sample().has_primary());
    }
}
