use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::rc::Rc;

use crate::descriptor::DescriptorInner;
use crate::epoch::{EpochGuard, EpochReclaimer, ThreadSlot};
use crate::gc;
use crate::sync::{thread_local, Arc};
use crate::FINISHED_DESCRIPTOR_THRESHOLD;

/// This thread's registration with one reclaimer instance. Invalidated and
/// re-created if the process-wide gc is ever restarted.
#[derive(Debug)]
struct LocalEpoch {
    reclaimer: *const EpochReclaimer,
    slot: Arc<ThreadSlot>,
    depth: Rc<Cell<usize>>,
}

/// Per-thread state: the epoch registration plus the buffer of finalized
/// descriptors awaiting their completion pass.
///
/// Whichever thread wins a descriptor's finalize CAS appends it here. Once
/// the buffer reaches [FINISHED_DESCRIPTOR_THRESHOLD] entries (or the thread
/// exits), every buffered descriptor has its words completed and is handed to
/// the reclaimer in one amortized pass. By the time a descriptor is retired
/// its target words are plain values again, so later readers never chase a
/// reference into it.
#[derive(Debug)]
pub(crate) struct ThreadContext {
    epoch: Option<LocalEpoch>,
    finished: Vec<*mut DescriptorInner>,
}

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::new());
}

impl ThreadContext {
    fn new() -> Self {
        Self {
            epoch: None,
            finished: Vec::with_capacity(FINISHED_DESCRIPTOR_THRESHOLD),
        }
    }

    fn local_epoch(&mut self, reclaimer: &EpochReclaimer) -> &LocalEpoch {
        let current: *const EpochReclaimer = reclaimer;
        let stale: bool = self
            .epoch
            .as_ref()
            .map_or(true, |local| local.reclaimer != current);
        if stale {
            // first pin on this thread, or the gc was restarted since
            self.epoch = Some(LocalEpoch {
                reclaimer: current,
                slot: reclaimer.register(),
                depth: Rc::new(Cell::new(0)),
            });
        }
        self.epoch.as_ref().expect("epoch registration just installed")
    }

    pub(crate) fn pin_local(&mut self, reclaimer: &EpochReclaimer) -> EpochGuard {
        let local: &LocalEpoch = self.local_epoch(reclaimer);
        EpochGuard::enter(reclaimer, Arc::clone(&local.slot), Rc::clone(&local.depth))
    }

    pub(crate) fn push_finished(&mut self, reclaimer: &EpochReclaimer, desc: *mut DescriptorInner) {
        if self.finished.len() >= FINISHED_DESCRIPTOR_THRESHOLD {
            self.flush(reclaimer);
        }
        self.finished.push(desc);
    }

    /// Complete every buffered descriptor's words, then retire the
    /// descriptors. Runs under a single epoch guard.
    pub(crate) fn flush(&mut self, reclaimer: &EpochReclaimer) {
        if self.finished.is_empty() {
            return;
        }
        let guard: EpochGuard = self.pin_local(reclaimer);
        for desc in self.finished.drain(..) {
            // SAFETY: a finished descriptor stays alive until retired below.
            let descriptor: &DescriptorInner = unsafe { &*desc };
            let status = descriptor.status();
            for word in descriptor.words() {
                word.complete(status);
            }
            reclaimer.retire(guard.slot(), desc);
        }
        drop(guard);
    }

    fn drain_on_exit(&mut self) {
        match gc::try_reclaimer() {
            Some(reclaimer) => self.flush(reclaimer),
            None => {
                // gc already torn down, so nothing can be in flight: complete
                // the words and free the slots directly
                for desc in self.finished.drain(..) {
                    // SAFETY: with the gc gone this buffer holds the only
                    // references to these descriptors.
                    let descriptor: &DescriptorInner = unsafe { &*desc };
                    let status = descriptor.status();
                    for word in descriptor.words() {
                        word.complete(status);
                    }
                    unsafe { drop(Box::from_raw(desc)) };
                }
            }
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.drain_on_exit();
    }
}

/// Pin the calling thread's epoch slot. Reentrant and cheap.
pub(crate) fn pin() -> EpochGuard {
    let reclaimer: &EpochReclaimer = gc::reclaimer();
    CONTEXT.with(|context| context.borrow_mut().pin_local(reclaimer))
}

/// Buffer a descriptor this thread just finalized.
pub(crate) fn enqueue_finished(desc: NonNull<DescriptorInner>) {
    let reclaimer: &EpochReclaimer = gc::reclaimer();
    CONTEXT.with(|context| context.borrow_mut().push_finished(reclaimer, desc.as_ptr()))
}

/// Flush the calling thread's buffer ahead of a gc teardown.
pub(crate) fn flush_current_thread(reclaimer: &EpochReclaimer) {
    CONTEXT.with(|context| context.borrow_mut().flush(reclaimer))
}
