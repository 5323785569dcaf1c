use core::fmt::{Display, Formatter};

use crate::err::InvalidStatusError;
use crate::sync::{AtomicU8, Ordering};

/// The decision state of a multi-word CAS descriptor.
///
/// A descriptor starts out `Active` and transitions exactly once, to either
/// `Successful` or `Failed`, via a compare-exchange on its status word. The
/// thread which wins that compare-exchange owns cleanup of the descriptor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    /// The operation linearized; every target word takes its new value.
    Successful = 0,
    /// The operation has not been decided yet. Threads which encounter an
    /// embedded reference to an `Active` descriptor help it to a decision.
    Active = 1,
    /// A target word held an unexpected value; every embedded target word
    /// reverts to its old value.
    Failed = 2,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TryFrom<u8> for Status {
    type Error = InvalidStatusError;

    fn try_from(status: u8) -> Result<Self, InvalidStatusError> {
        match status {
            s if s == Status::Successful as u8 => Ok(Status::Successful),
            s if s == Status::Active as u8 => Ok(Status::Active),
            s if s == Status::Failed as u8 => Ok(Status::Failed),
            s => Err(InvalidStatusError(s)),
        }
    }
}

/// Atomic cell holding a [Status].
///
/// Relaxed ordering is sufficient on every access: a descriptor is only
/// reachable through an acquire-loaded target word or through the owning
/// thread's own buffers, so its fields are already published by the time the
/// status can be observed.
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> Status {
        Status::try_from(self.0.load(Ordering::Relaxed))
            .expect("descriptor status was overwritten with an undefined value")
    }

    pub(crate) fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::Relaxed);
    }

    /// Attempt the single `current` to `desired` transition. Returns whether
    /// this caller performed it.
    pub(crate) fn transition(&self, current: Status, desired: Status) -> bool {
        self.0
            .compare_exchange(
                current as u8,
                desired as u8,
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}
