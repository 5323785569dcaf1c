use core::ptr;

use crate::batch;
use crate::descriptor::DescriptorInner;
use crate::field::{AtomicField, Field, MwCasValue};
use crate::status::Status;
use crate::sync::Ordering;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Read the logical value of a multi-word CAS target.
///
/// This is the only legal way to observe a target cell: a raw atomic load
/// could surface a transient descriptor reference instead of a value. When
/// the cell carries a reference to an undecided operation, the reader helps
/// that operation to completion before resolving, so a caller never waits on
/// another thread's progress.
#[cfg_attr(feature = "tracing", instrument)]
pub fn read<T: MwCasValue>(target: &AtomicField) -> T {
    let _guard = batch::pin();
    let (_, value) = resolve(target, None);
    value.as_value()
}

/// Load a target cell and resolve it to its logical value.
///
/// Returns `(raw, resolved)`: whatever was observed in the cell, plus the
/// value the cell logically holds. `current` carries the descriptor on whose
/// behalf the caller is reading, if any; entries embedded by that descriptor
/// are resolved without helping, which is what keeps an executing operation
/// from recursing into itself.
///
/// Callers must hold an epoch guard: the dereference of an embedded
/// reference is only safe because the parent cannot be reclaimed while the
/// guard is live.
pub(crate) fn resolve(target: &AtomicField, current: Option<&DescriptorInner>) -> (Field, Field) {
    loop {
        let raw: Field = target.load(Ordering::Acquire);
        if !raw.is_descriptor_ref() {
            return (raw, raw);
        }

        // SAFETY: the epoch guard held by the caller keeps the referenced
        // descriptor alive; the acquire load above published its fields.
        let word = unsafe { &*raw.as_descriptor_ptr() };
        let parent = unsafe { &*word.parent() };

        let status: Status = parent.status();
        if status == Status::Active && !current.is_some_and(|own| ptr::eq(parent, own)) {
            // someone else's undecided operation: help it finish, then retry
            parent.execute();
            continue;
        }
        return (raw, word.current_value(status));
    }
}
