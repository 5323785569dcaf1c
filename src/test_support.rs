//! Shared scaffolding for the in-crate test suites.

use std::sync::Once;

use crate::field::AtomicField;

static GC: Once = Once::new();

/// Start the process-wide gc exactly once for the whole unit-test binary.
/// Unit tests share one process, so nobody ever stops it; teardown is
/// exercised by the dedicated lifecycle integration test instead.
pub(crate) fn ensure_gc() {
    GC.call_once(crate::gc::start_gc);
}

/// A target cell that outlives every thread in the test process. Descriptor
/// completion can run as late as thread exit, so test targets must not live
/// on a test function's stack.
pub(crate) fn leaked_cell(value: usize) -> &'static AtomicField {
    Box::leak(Box::new(AtomicField::new(value)))
}
