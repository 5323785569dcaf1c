use crate::descriptor::DescriptorInner;
use crate::field::{AtomicField, Field};
use crate::status::Status;
use crate::sync::Ordering;

/// One target entry of a multi-word CAS: the address to update, the expected
/// and desired values, and a back-reference to the owning descriptor.
///
/// A word descriptor is written once, inside its parent, before the parent is
/// ever shared; from then on it is read-only. While the operation is in
/// flight a tagged reference to this entry sits in the target cell, which is
/// how conflicting operations find the parent and help it.
#[derive(Debug)]
pub(crate) struct WordDescriptor {
    addr: *mut AtomicField,
    old: Field,
    new: Field,
    parent: *const DescriptorInner,
}

// Immutable after construction; the target cell is only touched atomically.
// The parent back-reference is dereferenced under an epoch guard only.
unsafe impl Send for WordDescriptor {}
unsafe impl Sync for WordDescriptor {}

impl WordDescriptor {
    /// A vacant entry. Never embedded: the parent only exposes entries up to
    /// its registered count.
    pub(crate) fn empty() -> Self {
        Self {
            addr: core::ptr::null_mut(),
            old: Field::from_raw(0),
            new: Field::from_raw(0),
            parent: core::ptr::null(),
        }
    }

    pub(crate) fn new(
        addr: *mut AtomicField,
        old: Field,
        new: Field,
        parent: *const DescriptorInner,
    ) -> Self {
        Self {
            addr,
            old,
            new,
            parent,
        }
    }

    pub(crate) fn addr(&self) -> *mut AtomicField {
        self.addr
    }

    pub(crate) fn cell(&self) -> &AtomicField {
        // SAFETY: entries past the registered count are never handed out, so
        // addr points to a live target cell.
        unsafe { &*self.addr }
    }

    pub(crate) fn old(&self) -> Field {
        self.old
    }

    pub(crate) fn parent(&self) -> *const DescriptorInner {
        self.parent
    }

    /// The logical value of the target once the parent reached `status`.
    pub(crate) fn current_value(&self, status: Status) -> Field {
        if status == Status::Successful {
            self.new
        } else {
            self.old
        }
    }

    /// CAS the target cell from `expected` to a tagged reference to this
    /// entry. Release on success publishes the parent's fields to any thread
    /// that later chases the reference.
    pub(crate) fn embed(&self, expected: Field) -> bool {
        let reference: Field = Field::descriptor_ref(self);
        self.cell()
            .compare_exchange(expected, reference, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// CAS the tagged reference back to the value `status` dictates.
    ///
    /// Idempotent: whichever caller gets here first performs the swap, every
    /// later caller fails the compare harmlessly. Relaxed is enough since the
    /// payload was published by `embed`.
    pub(crate) fn complete(&self, status: Status) {
        let reference: Field = Field::descriptor_ref(self);
        let _ = self.cell().compare_exchange(
            reference,
            self.current_value(status),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }
}
