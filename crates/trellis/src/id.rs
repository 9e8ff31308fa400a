//! Change fingerprints and synthetic identity sources.
//!
//! A [`ValueId`] answers one question: did an input change since the last
//! pass? Two ids compare equal iff the values they stand for are considered
//! unchanged. Distinctness is best-effort; a collision is a correctness bug
//! in the fingerprinted inputs, never a crash.

use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Opaque, equality-comparable change fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ValueId(u64);

impl ValueId {
    /// Fingerprint of "no inputs". Combining with `UNIT` still yields a new
    /// id, so a tuple of one value is distinguishable from the value itself.
    pub const UNIT: Self = Self(0);

    /// Fingerprint an arbitrary hashable value.
    ///
    /// Stable within a process: hashing equal values always yields equal ids.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Combine two fingerprints into the fingerprint of the pair.
    ///
    /// Deterministic and order-sensitive: `combine(a, b)` always yields the
    /// same id, and it differs from `combine(b, a)` for distinct inputs.
    pub fn combine(self, other: ValueId) -> ValueId {
        let mut mixed = self.0;
        mixed ^= other
            .0
            .wrapping_add(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(mixed << 6)
            .wrapping_add(mixed >> 2);
        ValueId(mixed)
    }
}

/// Monotonic counter handing out synthetic fingerprints.
///
/// Every minted id is distinct from all earlier ones, which makes the source
/// suitable for "this changed, period" signaling and cache invalidation.
#[derive(Debug, Default, Clone)]
pub struct IdSource {
    counter: u64,
}

impl IdSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh synthetic fingerprint.
    pub fn mint(&mut self) -> ValueId {
        self.counter += 1;
        ValueId(self.counter)
    }
}

/// Fingerprint holder for change detection between passes.
///
/// Stores the id, not the value. `matches` is false before the first
/// `capture`, so a freshly constructed holder always reports a change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapturedId(Option<ValueId>);

impl CapturedId {
    /// Holder already primed with a captured id.
    pub fn captured(id: ValueId) -> Self {
        Self(Some(id))
    }

    /// Does the new fingerprint match the captured one?
    pub fn matches(&self, id: ValueId) -> bool {
        self.0 == Some(id)
    }

    /// Record the fingerprint of the current pass.
    pub fn capture(&mut self, id: ValueId) {
        self.0 = Some(id);
    }

    /// Forget the captured fingerprint, forcing the next `matches` to fail.
    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn is_captured(&self) -> bool {
        self.0.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic() {
        assert_eq!(ValueId::of("alpha"), ValueId::of("alpha"));
        assert_ne!(ValueId::of("alpha"), ValueId::of("beta"));
    }

    #[test]
    fn combine_is_deterministic_and_order_sensitive() {
        let a = ValueId::of(&1u32);
        let b = ValueId::of(&2u32);

        assert_eq!(a.combine(b), a.combine(b));
        assert_ne!(a.combine(b), b.combine(a));
        assert_ne!(a.combine(ValueId::UNIT), a);
    }

    #[test]
    fn captured_id_misses_before_first_capture() {
        let id = ValueId::of(&42u64);
        let mut captured = CapturedId::default();

        assert!(!captured.matches(id));
        captured.capture(id);
        assert!(captured.matches(id));
        assert!(!captured.matches(ValueId::of(&43u64)));

        captured.clear();
        assert!(!captured.matches(id));
    }

    #[test]
    fn id_source_mints_distinct_ids() {
        let mut source = IdSource::new();
        let first = source.mint();
        let second = source.mint();
        assert_ne!(first, second);
    }
}
