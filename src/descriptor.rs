use core::array;
use core::fmt;
use core::mem;
use core::ptr::NonNull;

use crate::batch;
use crate::field::{AtomicField, Field, MwCasValue};
use crate::reader;
use crate::status::{AtomicStatus, Status};
use crate::word::WordDescriptor;
use crate::MWCAS_CAPACITY;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Shared state of one multi-word CAS operation.
///
/// Owned exclusively by one thread while targets are registered; shared as
/// soon as execution starts, both with helpers that chase embedded references
/// and, after finalization, with the reclaimer. Aligned to a cache line so
/// that helpers hammering `status` do not false-share with neighbors.
#[repr(align(64))]
#[derive(Debug)]
pub(crate) struct DescriptorInner {
    status: AtomicStatus,
    count: usize,
    words: [WordDescriptor; MWCAS_CAPACITY],
}

impl DescriptorInner {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicStatus::new(Status::Active),
            count: 0,
            words: array::from_fn(|_| WordDescriptor::empty()),
        }
    }

    /// Reset a recycled slot in place. The caller must hold the only
    /// reference to it.
    pub(crate) fn reinit(&mut self) {
        self.status.store(Status::Active);
        self.count = 0;
    }

    pub(crate) fn status(&self) -> Status {
        self.status.load()
    }

    pub(crate) fn size(&self) -> usize {
        self.count
    }

    /// The registered entries.
    pub(crate) fn words(&self) -> &[WordDescriptor] {
        &self.words[..self.count]
    }

    /// Append a target entry. Rejects registration beyond the capacity.
    pub(crate) fn push_target(&mut self, addr: *mut AtomicField, old: Field, new: Field) -> bool {
        if self.count == MWCAS_CAPACITY {
            return false;
        }
        debug_assert!(
            self.words[..self.count]
                .iter()
                .all(|word| !core::ptr::eq(word.addr(), addr)),
            "an address may be registered at most once per multi-word CAS"
        );
        let parent: *const DescriptorInner = self;
        self.words[self.count] = WordDescriptor::new(addr, old, new, parent);
        self.count += 1;
        true
    }

    /// Drive this operation to a decision. Called by the owning thread and by
    /// any helper that runs into one of our embedded references; every caller
    /// returns the same decision.
    #[cfg_attr(feature = "tracing", instrument)]
    pub(crate) fn execute(&self) -> bool {
        let _guard = batch::pin();

        // Embed phase: serialize against conflicting operations by installing
        // a tagged reference to each entry into its target word.
        let mut mwcas_success: bool = true;
        'words: for word in self.words() {
            loop {
                let (raw, value) = reader::resolve(word.cell(), Some(self));
                if raw.is_ref_to(word) {
                    // a helper already embedded this entry
                    continue 'words;
                }
                if value != word.old() {
                    mwcas_success = false;
                    break 'words;
                }
                if self.status() != Status::Active {
                    // another thread finalized us while we were embedding
                    break 'words;
                }
                if word.embed(raw) {
                    continue 'words;
                }
            }
        }

        if self.finalize(mwcas_success) {
            batch::enqueue_finished(NonNull::from(self));
        }

        self.status() == Status::Successful
    }

    /// The linearization point: CAS the status from `Active` to the decision.
    /// Returns whether this caller won and therefore owns cleanup. A late
    /// caller whose own `mwcas_success` disagrees with the decision fails the
    /// CAS harmlessly.
    pub(crate) fn finalize(&self, mwcas_success: bool) -> bool {
        let desired: Status = if mwcas_success {
            Status::Successful
        } else {
            Status::Failed
        };
        self.status.transition(Status::Active, desired)
    }
}

/// An owning handle to a multi-word CAS in preparation.
///
/// Obtained from [`get_descriptor`](crate::get_descriptor). Register up to
/// [MWCAS_CAPACITY] targets with [add_target](Self::add_target), then call
/// [execute](Self::execute), which consumes the handle: from the moment the
/// operation is decided the descriptor belongs to the cooperative protocol,
/// and the winning thread hands it to the reclaimer.
///
/// Registering the same address twice in one descriptor is not supported;
/// debug builds reject it with a panic.
pub struct MwCasDescriptor {
    inner: NonNull<DescriptorInner>,
}

impl MwCasDescriptor {
    pub(crate) fn from_inner(inner: NonNull<DescriptorInner>) -> Self {
        Self { inner }
    }

    fn inner(&self) -> &DescriptorInner {
        // SAFETY: a live handle always refers to a descriptor which has not
        // been executed, so the reclaimer cannot have freed it.
        unsafe { self.inner.as_ref() }
    }

    /// Register `target` to transition from `old` to `new`. Returns `false`
    /// when the descriptor is already at capacity, leaving it unchanged.
    ///
    /// The target cell must outlive the operation's reclamation; see
    /// [AtomicField].
    pub fn add_target<T: MwCasValue>(&mut self, target: &AtomicField, old: T, new: T) -> bool {
        let addr: *mut AtomicField = target as *const AtomicField as *mut AtomicField;
        // SAFETY: until execute(), this handle holds the only reference.
        let inner: &mut DescriptorInner = unsafe { self.inner.as_mut() };
        inner.push_target(addr, Field::from_value(old), Field::from_value(new))
    }

    /// Perform the multi-word CAS. Returns whether every target atomically
    /// transitioned from its old to its new value; on `false` no target was
    /// changed. Never blocks: conflicting operations are helped to completion
    /// instead.
    pub fn execute(self) -> bool {
        let inner: NonNull<DescriptorInner> = self.inner;
        mem::forget(self);
        // SAFETY: the descriptor stays alive at least until the reclaimer can
        // prove no thread observes it, which is after this call returns.
        unsafe { inner.as_ref() }.execute()
    }

    /// The number of registered targets.
    pub fn size(&self) -> usize {
        self.inner().size()
    }

    /// The current decision status. `Active` until [execute](Self::execute).
    pub fn status(&self) -> Status {
        self.inner().status()
    }
}

impl fmt::Debug for MwCasDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MwCasDescriptor")
            .field("status", &self.status())
            .field("size", &self.size())
            .finish()
    }
}

impl Drop for MwCasDescriptor {
    fn drop(&mut self) {
        // never executed, so never shared: the slot can go straight back
        crate::gc::recycle_unshared(self.inner);
    }
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use crate::descriptor::DescriptorInner;
    use crate::field::{AtomicField, Field};
    use crate::status::Status;
    use crate::test_support::{ensure_gc, leaked_cell};
    use crate::{get_descriptor, read, MwCasDescriptor, MWCAS_CAPACITY};

    use test_log::test;
    use tracing::debug;

    #[test]
    fn test_two_word_success_installs_both_values() {
        ensure_gc();
        let first: &'static AtomicField = leaked_cell(10);
        let second: &'static AtomicField = leaked_cell(20);

        let mut descriptor: MwCasDescriptor = get_descriptor();
        assert!(descriptor.add_target(first, 10usize, 11usize));
        assert!(descriptor.add_target(second, 20usize, 21usize));
        debug!("descriptor before execution: {descriptor:?}");

        assert!(descriptor.execute());
        assert_eq!(read::<usize>(first), 11);
        assert_eq!(read::<usize>(second), 21);
    }

    #[test]
    fn test_mismatched_expectation_leaves_all_targets_untouched() {
        ensure_gc();
        let first: &'static AtomicField = leaked_cell(10);
        let second: &'static AtomicField = leaked_cell(20);

        let mut descriptor: MwCasDescriptor = get_descriptor();
        assert!(descriptor.add_target(first, 10usize, 11usize));
        assert!(descriptor.add_target(second, 99usize, 21usize));

        assert!(!descriptor.execute());
        assert_eq!(read::<usize>(first), 10);
        assert_eq!(read::<usize>(second), 20);
    }

    #[test]
    fn test_empty_descriptor_trivially_succeeds() {
        ensure_gc();
        let descriptor: MwCasDescriptor = get_descriptor();
        assert_eq!(descriptor.size(), 0);
        assert!(descriptor.execute());
    }

    #[test]
    fn test_capacity_overflow_is_reported_and_harmless() {
        ensure_gc();
        let cells: Vec<&'static AtomicField> =
            (0..=MWCAS_CAPACITY).map(|i| leaked_cell(i)).collect();

        let mut descriptor: MwCasDescriptor = get_descriptor();
        for (i, cell) in cells.iter().enumerate().take(MWCAS_CAPACITY) {
            assert!(descriptor.add_target(*cell, i, i + 100));
        }
        assert!(!descriptor.add_target(cells[MWCAS_CAPACITY], MWCAS_CAPACITY, 0));
        assert_eq!(descriptor.size(), MWCAS_CAPACITY);

        assert!(descriptor.execute());
        for (i, cell) in cells.iter().enumerate().take(MWCAS_CAPACITY) {
            assert_eq!(read::<usize>(*cell), i + 100);
        }
        assert_eq!(read::<usize>(cells[MWCAS_CAPACITY]), MWCAS_CAPACITY);
    }

    #[test]
    fn test_unexecuted_descriptor_reports_active() {
        ensure_gc();
        let cell: &'static AtomicField = leaked_cell(1);
        let mut descriptor: MwCasDescriptor = get_descriptor();
        assert!(descriptor.add_target(cell, 1usize, 2usize));
        assert_eq!(descriptor.status(), Status::Active);
        assert_eq!(descriptor.size(), 1);
        drop(descriptor);
        assert_eq!(read::<usize>(cell), 1);
    }

    #[test]
    #[should_panic(expected = "registered at most once")]
    fn test_duplicate_address_is_rejected_in_debug_builds() {
        ensure_gc();
        let cell: &'static AtomicField = leaked_cell(1);
        let mut descriptor: MwCasDescriptor = get_descriptor();
        assert!(descriptor.add_target(cell, 1usize, 2usize));
        descriptor.add_target(cell, 2usize, 3usize);
    }

    #[test]
    fn test_reader_helps_half_embedded_operation_to_completion() {
        ensure_gc();
        let first: &'static AtomicField = leaked_cell(1);
        let second: &'static AtomicField = leaked_cell(2);

        let inner: &'static mut DescriptorInner = Box::leak(Box::new(DescriptorInner::new()));
        assert!(inner.push_target(
            first as *const AtomicField as *mut AtomicField,
            Field::from_value(1usize),
            Field::from_value(3usize),
        ));
        assert!(inner.push_target(
            second as *const AtomicField as *mut AtomicField,
            Field::from_value(2usize),
            Field::from_value(4usize),
        ));
        let inner: &'static DescriptorInner = inner;

        // embed only the first entry, as a stalled owner would
        assert!(inner.words()[0].embed(Field::from_value(1usize)));

        // a reader arriving at the embedded reference must drive the whole
        // operation to a decision and never surface the reference itself
        assert_eq!(read::<usize>(first), 3);
        assert_eq!(inner.status(), Status::Successful);
        assert_eq!(read::<usize>(second), 4);
    }

    #[test]
    fn test_execute_tolerates_entries_embedded_by_helpers() {
        ensure_gc();
        let first: &'static AtomicField = leaked_cell(5);
        let second: &'static AtomicField = leaked_cell(6);

        let inner: &'static mut DescriptorInner = Box::leak(Box::new(DescriptorInner::new()));
        assert!(inner.push_target(
            first as *const AtomicField as *mut AtomicField,
            Field::from_value(5usize),
            Field::from_value(7usize),
        ));
        assert!(inner.push_target(
            second as *const AtomicField as *mut AtomicField,
            Field::from_value(6usize),
            Field::from_value(8usize),
        ));
        let inner: &'static DescriptorInner = inner;

        // both entries already embedded, as if helpers got there first
        assert!(inner.words()[0].embed(Field::from_value(5usize)));
        assert!(inner.words()[1].embed(Field::from_value(6usize)));

        assert!(inner.execute());
        assert_eq!(read::<usize>(first), 7);
        assert_eq!(read::<usize>(second), 8);
    }

    #[test]
    fn test_pointer_targets_swap_like_integers() {
        ensure_gc();
        let before: *mut u64 = Box::into_raw(Box::new(7));
        let after: *mut u64 = Box::into_raw(Box::new(9));
        let cell: &'static AtomicField = Box::leak(Box::new(AtomicField::new(before)));

        let mut descriptor: MwCasDescriptor = get_descriptor();
        assert!(descriptor.add_target(cell, before, after));
        assert!(descriptor.execute());

        let observed: *mut u64 = read(cell);
        assert_eq!(observed, after);
        // SAFETY: `after` came from Box::into_raw above and was never freed.
        assert_eq!(unsafe { *observed }, 9);

        // SAFETY: the old pointer is no longer reachable through the cell.
        unsafe { drop(Box::from_raw(before)) };
    }
}
