//! Identifiers for graph components and clip references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a state, nested machine or edge within one controller.
///
/// UIDs survive serialization and are what edges use to refer to their endpoints on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Uid(pub u32);

impl Uid {
    /// The root state machine of every controller.
    pub const ROOT: Uid = Uid(0);

    /// Largest UID that fits the signed wire field.
    pub const MAX: Uid = Uid(i32::MAX as u32);

    /// Wire representation; `-1` is reserved for "no UID".
    ///
    /// Allocated and loaded UIDs never exceed [`Uid::MAX`].
    #[inline]
    pub fn to_wire(self) -> i32 {
        debug_assert!(self <= Uid::MAX, "uid {self} does not fit the wire format");
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }

    #[inline]
    pub fn from_wire(raw: i32) -> Option<Uid> {
        if raw < 0 {
            None
        } else {
            Some(Uid(raw as u32))
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Content hash of an animation slot name.
pub type ClipHash = u32;

const CRC32_ALGO: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_CKSUM);

/// Hash a slot name into the reference stored by leaf states.
///
/// Two names with the same hash are indistinguishable; collisions are not resolved.
pub fn clip_hash(name: &str) -> ClipHash {
    CRC32_ALGO.checksum(name.as_bytes())
}

/// Monotonic UID allocator owned by a controller.
///
/// `last` is persisted with the controller so reloaded graphs never hand out a UID that an
/// older save already used.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct UidAllocator {
    last: u32,
}

impl UidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an allocator whose last handed-out UID was `last`.
    pub fn restored(last: u32) -> Self {
        Self { last }
    }

    /// Next UID, or `None` once [`Uid::MAX`] has been handed out.
    #[inline]
    pub fn alloc(&mut self) -> Option<Uid> {
        let next = self.last.checked_add(1).filter(|&next| next <= Uid::MAX.0)?;
        self.last = next;
        Some(Uid(next))
    }

    #[inline]
    pub fn last(&self) -> u32 {
        self.last
    }

    /// Make sure future allocations stay above `uid`.
    #[inline]
    pub fn observe(&mut self, uid: Uid) {
        if uid.0 > self.last {
            self.last = uid.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_monotonic_from_one() {
        let mut alloc = UidAllocator::new();
        assert_eq!(alloc.alloc(), Some(Uid(1)));
        assert_eq!(alloc.alloc(), Some(Uid(2)));
        assert_eq!(alloc.last(), 2);
    }

    #[test]
    fn restored_allocator_continues_after_last() {
        let mut alloc = UidAllocator::restored(41);
        assert_eq!(alloc.alloc(), Some(Uid(42)));
        alloc.observe(Uid(100));
        assert_eq!(alloc.alloc(), Some(Uid(101)));
        alloc.observe(Uid(3));
        assert_eq!(alloc.alloc(), Some(Uid(102)));
    }

    #[test]
    fn alloc_stops_at_the_wire_limit() {
        let mut alloc = UidAllocator::restored(Uid::MAX.0 - 1);
        assert_eq!(alloc.alloc(), Some(Uid::MAX));
        assert_eq!(Uid::MAX.to_wire(), i32::MAX);
        assert_eq!(alloc.alloc(), None);
        assert_eq!(alloc.last(), Uid::MAX.0);
    }

    #[test]
    fn wire_round_trip_and_skip_marker() {
        assert_eq!(Uid::from_wire(Uid(7).to_wire()), Some(Uid(7)));
        assert_eq!(Uid::from_wire(-1), None);
    }

    #[test]
    fn clip_hash_is_stable_and_name_sensitive() {
        assert_eq!(clip_hash("walk"), clip_hash("walk"));
        assert_ne!(clip_hash("walk"), clip_hash("run"));
    }
}
