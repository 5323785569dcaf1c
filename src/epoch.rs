use core::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::descriptor::DescriptorInner;
use crate::sync::{fence, Arc, AtomicBool, AtomicUsize, Mutex, Ordering};
use crate::FINISHED_DESCRIPTOR_THRESHOLD;

/// Epoch published by a thread with no guard outstanding.
pub(crate) const INACTIVE_EPOCH: usize = usize::MAX;

/// Retired descriptors parked for reuse before falling back to deallocation.
const FREE_LIST_CAPACITY: usize = FINISHED_DESCRIPTOR_THRESHOLD;

/// A retired descriptor and the epoch at which it left circulation.
#[derive(Debug)]
struct RetiredDescriptor {
    ptr: *mut DescriptorInner,
    epoch: usize,
}

// A retired descriptor is owned exclusively by the reclaimer.
unsafe impl Send for RetiredDescriptor {}

/// Per-thread reclamation state: the epoch the thread is pinned at (or
/// [INACTIVE_EPOCH]) and the descriptors it has retired. Each slot takes its
/// own cache line so epoch publication does not false-share across threads.
#[repr(align(64))]
#[derive(Debug)]
pub(crate) struct ThreadSlot {
    active_epoch: AtomicUsize,
    retired: Mutex<Vec<RetiredDescriptor>>,
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            active_epoch: AtomicUsize::new(INACTIVE_EPOCH),
            retired: Mutex::new(Vec::new()),
        }
    }

    fn release(&self) {
        self.active_epoch.store(INACTIVE_EPOCH, Ordering::SeqCst);
    }
}

/// Scoped pin of the current thread's epoch.
///
/// Cheap to re-enter: only the outermost guard on a thread publishes and
/// clears the slot, nested guards just bump a local depth counter.
#[derive(Debug)]
pub(crate) struct EpochGuard {
    slot: Arc<ThreadSlot>,
    depth: Rc<Cell<usize>>,
}

impl EpochGuard {
    pub(crate) fn enter(
        reclaimer: &EpochReclaimer,
        slot: Arc<ThreadSlot>,
        depth: Rc<Cell<usize>>,
    ) -> Self {
        if depth.get() == 0 {
            slot.active_epoch
                .store(reclaimer.global_epoch(), Ordering::SeqCst);
        }
        depth.set(depth.get() + 1);
        Self { slot, depth }
    }

    pub(crate) fn slot(&self) -> &Arc<ThreadSlot> {
        &self.slot
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        let remaining: usize = self.depth.get() - 1;
        self.depth.set(remaining);
        if remaining == 0 {
            self.slot.release();
        }
    }
}

/// Epoch-based reclamation of finished descriptors.
///
/// A monotonically increasing global epoch is advanced on a fixed cadence by
/// background workers. Every thread publishes the epoch it entered when it
/// pinned; a retired descriptor carries the epoch at which it was retired and
/// is freed (or recycled) only once every published epoch has moved past it.
#[derive(Debug)]
pub(crate) struct EpochReclaimer {
    global_epoch: AtomicUsize,
    slots: Mutex<Vec<Arc<ThreadSlot>>>,
    free: Mutex<Vec<RetiredDescriptor>>,
    running: AtomicBool,
    interval: Duration,
    worker_count: usize,
    // worker bookkeeping stays on plain std types: workers are real OS
    // threads and do not exist in model-checked builds
    workers: std::sync::Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl EpochReclaimer {
    pub(crate) fn new(interval: Duration, worker_threads: usize) -> Self {
        // model checkers cannot schedule foreign OS threads; those builds
        // advance the epoch inline from the retire path instead
        let worker_count: usize = if cfg!(any(loom, feature = "shuttle")) {
            0
        } else {
            worker_threads
        };
        Self {
            global_epoch: AtomicUsize::new(1),
            slots: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            interval,
            worker_count,
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn global_epoch(&self) -> usize {
        self.global_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_epoch(&self) {
        self.global_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Register a new per-thread slot.
    pub(crate) fn register(&self) -> Arc<ThreadSlot> {
        let slot: Arc<ThreadSlot> = Arc::new(ThreadSlot::new());
        self.slots
            .lock()
            .expect("thread slot registry poisoned")
            .push(Arc::clone(&slot));
        slot
    }

    /// Smallest epoch any thread is still pinned at.
    fn min_active_epoch(&self) -> usize {
        let slots = self.slots.lock().expect("thread slot registry poisoned");
        slots
            .iter()
            .map(|slot| slot.active_epoch.load(Ordering::SeqCst))
            .min()
            .unwrap_or(INACTIVE_EPOCH)
    }

    /// Hand over a finished descriptor. It becomes freeable once every guard
    /// pinned no later than the current epoch has been released.
    pub(crate) fn retire(&self, slot: &ThreadSlot, desc: *mut DescriptorInner) {
        let epoch: usize = self.global_epoch();
        let pending: usize = {
            let mut retired = slot.retired.lock().expect("retire list poisoned");
            retired.push(RetiredDescriptor { ptr: desc, epoch });
            retired.len()
        };
        if self.worker_count == 0 && pending >= FINISHED_DESCRIPTOR_THRESHOLD {
            self.advance_epoch();
            self.collect();
        }
    }

    /// Sweep every retire list and recycle or free what no guard can reach.
    pub(crate) fn collect(&self) {
        fence(Ordering::SeqCst);
        let min_active: usize = self.min_active_epoch();
        let slots: Vec<Arc<ThreadSlot>> = self
            .slots
            .lock()
            .expect("thread slot registry poisoned")
            .clone();

        for slot in slots {
            let mut reclaimable: Vec<RetiredDescriptor> = Vec::new();
            {
                let mut retired = slot.retired.lock().expect("retire list poisoned");
                let mut index: usize = 0;
                while index < retired.len() {
                    if retired[index].epoch < min_active {
                        reclaimable.push(retired.swap_remove(index));
                    } else {
                        index += 1;
                    }
                }
            }
            if reclaimable.is_empty() {
                continue;
            }
            #[cfg(feature = "tracing")]
            tracing::trace!(count = reclaimable.len(), "reclaiming retired descriptors");

            let mut free = self.free.lock().expect("free list poisoned");
            for retired in reclaimable {
                if free.len() < FREE_LIST_CAPACITY {
                    free.push(retired);
                } else {
                    // SAFETY: no guard pinned at or before the retirement
                    // epoch remains, so nothing can still observe this slot.
                    unsafe { drop(Box::from_raw(retired.ptr)) };
                }
            }
        }
    }

    /// A previously retired, now provably unreachable slot ready to be
    /// reinitialized in place.
    pub(crate) fn try_reuse(&self) -> Option<*mut DescriptorInner> {
        self.free
            .lock()
            .expect("free list poisoned")
            .pop()
            .map(|retired| retired.ptr)
    }

    /// Take back a descriptor which was never shared with other threads.
    pub(crate) fn recycle_unshared(&self, desc: *mut DescriptorInner) {
        let mut free = self.free.lock().expect("free list poisoned");
        if free.len() < FREE_LIST_CAPACITY {
            free.push(RetiredDescriptor {
                ptr: desc,
                epoch: 0,
            });
        } else {
            // SAFETY: the descriptor was never published to another thread.
            unsafe { drop(Box::from_raw(desc)) };
        }
    }

    /// Launch the background workers advancing the epoch every `interval`.
    #[cfg(not(any(loom, feature = "shuttle")))]
    pub(crate) fn spawn_workers(this: *const Self) {
        // SAFETY: shutdown() joins every worker before the reclaimer is
        // freed, so the pointer stays valid for the workers' lifetime.
        let reclaimer: &EpochReclaimer = unsafe { &*this };
        let mut workers = reclaimer
            .workers
            .lock()
            .expect("worker registry poisoned");
        for _ in 0..reclaimer.worker_count {
            let handle: WorkerHandle = WorkerHandle(this);
            workers.push(std::thread::spawn(move || {
                let handle = handle;
                // SAFETY: see spawn_workers.
                let reclaimer: &EpochReclaimer = unsafe { &*handle.0 };
                while reclaimer.running.load(Ordering::Acquire) {
                    std::thread::sleep(reclaimer.interval);
                    if !reclaimer.running.load(Ordering::Acquire) {
                        break;
                    }
                    reclaimer.advance_epoch();
                    reclaimer.collect();
                }
            }));
        }
    }

    /// Stop the workers and free everything still parked. The caller must
    /// guarantee that no operation is in flight and no guard is outstanding.
    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        #[cfg(not(any(loom, feature = "shuttle")))]
        {
            let workers: Vec<std::thread::JoinHandle<()>> = {
                let mut guard = self.workers.lock().expect("worker registry poisoned");
                guard.drain(..).collect()
            };
            for worker in workers {
                let _ = worker.join();
            }
        }
        self.drain_all();
    }

    fn drain_all(&self) {
        let slots: Vec<Arc<ThreadSlot>> = self
            .slots
            .lock()
            .expect("thread slot registry poisoned")
            .clone();
        for slot in slots {
            let drained: Vec<RetiredDescriptor> = {
                let mut retired = slot.retired.lock().expect("retire list poisoned");
                retired.drain(..).collect()
            };
            for retired in drained {
                // SAFETY: shutdown requires that no guard is outstanding.
                unsafe { drop(Box::from_raw(retired.ptr)) };
            }
        }
        let freed: Vec<RetiredDescriptor> = {
            let mut free = self.free.lock().expect("free list poisoned");
            free.drain(..).collect()
        };
        for retired in freed {
            // SAFETY: free-list entries are unreachable by construction.
            unsafe { drop(Box::from_raw(retired.ptr)) };
        }
    }
}

impl Drop for EpochReclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(not(any(loom, feature = "shuttle")))]
struct WorkerHandle(*const EpochReclaimer);

#[cfg(not(any(loom, feature = "shuttle")))]
// Workers only dereference the pointer while shutdown() has not joined them.
unsafe impl Send for WorkerHandle {}
