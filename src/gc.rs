use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, Ordering};
use std::time::Duration;

use crate::batch;
use crate::descriptor::{DescriptorInner, MwCasDescriptor};
use crate::epoch::EpochReclaimer;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Default cadence at which the background workers advance the epoch.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_micros(100_000);

/// Default number of background reclamation workers.
pub const DEFAULT_GC_WORKERS: usize = 1;

// Process-wide reclaimer registry. Deliberately a plain std atomic even in
// model-checked builds: it is a set-once pointer, and every synchronization
// of interest lives inside the reclaimer itself.
static RECLAIMER: AtomicPtr<EpochReclaimer> = AtomicPtr::new(core::ptr::null_mut());

/// Start descriptor garbage collection with the default interval and worker
/// count. Must be called before any multi-word CAS operation in the process.
pub fn start_gc() {
    start_gc_with(DEFAULT_GC_INTERVAL, DEFAULT_GC_WORKERS);
}

/// Start (or restart) descriptor garbage collection.
///
/// `interval` is the cadence at which `worker_threads` background workers
/// advance the global epoch and sweep retired descriptors. With zero workers
/// the epoch is advanced inline whenever a thread's retire list crosses the
/// batch threshold. Restarting drains and replaces the previous reclaimer;
/// no operation may be in flight while that happens.
#[cfg_attr(feature = "tracing", instrument)]
pub fn start_gc_with(interval: Duration, worker_threads: usize) {
    let reclaimer: *mut EpochReclaimer =
        Box::into_raw(Box::new(EpochReclaimer::new(interval, worker_threads)));
    #[cfg(not(any(loom, feature = "shuttle")))]
    EpochReclaimer::spawn_workers(reclaimer);

    let previous: *mut EpochReclaimer = RECLAIMER.swap(reclaimer, Ordering::AcqRel);
    if !previous.is_null() {
        // SAFETY: the swap returned ownership of the previous reclaimer;
        // dropping it joins its workers and frees everything it still holds.
        unsafe { drop(Box::from_raw(previous)) };
    }
}

/// Tear down descriptor garbage collection.
///
/// Flushes the calling thread's finished-descriptor buffer, then stops the
/// workers and frees every retired descriptor. No multi-word CAS operation
/// may be in flight, and every other thread that performed operations must
/// have exited (their buffers flush when they do).
#[cfg_attr(feature = "tracing", instrument)]
pub fn stop_gc() {
    if let Some(reclaimer) = try_reclaimer() {
        batch::flush_current_thread(reclaimer);
    }
    let previous: *mut EpochReclaimer = RECLAIMER.swap(core::ptr::null_mut(), Ordering::AcqRel);
    if !previous.is_null() {
        // SAFETY: as above; the registry no longer hands the pointer out.
        unsafe { drop(Box::from_raw(previous)) };
    }
}

pub(crate) fn try_reclaimer() -> Option<&'static EpochReclaimer> {
    // SAFETY: the registered reclaimer is only freed by start_gc/stop_gc,
    // which require that no operation is in flight when they run.
    unsafe { RECLAIMER.load(Ordering::Acquire).as_ref() }
}

pub(crate) fn reclaimer() -> &'static EpochReclaimer {
    match try_reclaimer() {
        Some(reclaimer) => reclaimer,
        None => panic!(
            "garbage collection is not running: call start_gc() before any multi-word CAS operation"
        ),
    }
}

/// Obtain a descriptor for a new multi-word CAS.
///
/// Prefers a recycled slot from the reclaimer's free list and only allocates
/// when none is available. The returned descriptor is `Active` and empty.
///
/// # Panics
///
/// Panics if [start_gc] has not been called.
#[cfg_attr(feature = "tracing", instrument)]
pub fn get_descriptor() -> MwCasDescriptor {
    let reclaimer: &EpochReclaimer = reclaimer();
    let inner: NonNull<DescriptorInner> = match reclaimer.try_reuse() {
        Some(recycled) => {
            // SAFETY: the reclaimer only hands out slots no thread can still
            // observe, so we have exclusive access for the reset.
            unsafe {
                (*recycled).reinit();
                NonNull::new_unchecked(recycled)
            }
        }
        None => NonNull::from(Box::leak(Box::new(DescriptorInner::new()))),
    };
    MwCasDescriptor::from_inner(inner)
}

pub(crate) fn recycle_unshared(desc: NonNull<DescriptorInner>) {
    match try_reclaimer() {
        Some(reclaimer) => reclaimer.recycle_unshared(desc.as_ptr()),
        // SAFETY: the handle being dropped owned the only reference.
        None => unsafe { drop(Box::from_raw(desc.as_ptr())) },
    }
}
