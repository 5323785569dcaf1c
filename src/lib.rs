//! # MwCAS
//!
//! A lock-free multi-word compare-and-swap library. It atomically
//! compare-and-updates up to [MWCAS_CAPACITY] machine words at arbitrary,
//! non-contiguous addresses with the same guarantee as a single-word CAS:
//! either every target transitions from its expected to its desired value, or
//! none does. Only single-width atomic compare-and-swap is required, so the
//! algorithm is lock-free on x86-64 and AArch64 alike.
//!
//! The design follows the cooperative descriptor-passing approach from the
//! lock-free indexing literature (see
//! [`Easy Lock-Free Indexing in Non-Volatile Memory`](http://justinlevandoski.org/papers/ICDE18_mwcas.pdf)):
//! an operation publishes a *descriptor*, installs tagged references to it
//! into every target word, and flips a single status word as its
//! linearization point. Any thread that runs into another operation's tagged
//! reference helps that operation finish before proceeding, so no thread
//! ever waits on another thread's scheduling. Finished descriptors are
//! recycled through an epoch-based reclaimer.
//!
//! # Usage
//! ## Example
//! ```edition2021
//! use mwcas::{get_descriptor, read, start_gc, stop_gc, AtomicField};
//!
//! // reclamation of finished descriptors must be running first
//! start_gc();
//!
//! let first = AtomicField::new(10usize);
//! let second = AtomicField::new(20usize);
//!
//! let mut descriptor = get_descriptor();
//! assert!(descriptor.add_target(&first, 10usize, 11usize));
//! assert!(descriptor.add_target(&second, 20usize, 21usize));
//!
//! // both words move together, or not at all
//! assert!(descriptor.execute());
//! assert_eq!(read::<usize>(&first), 11);
//! assert_eq!(read::<usize>(&second), 21);
//!
//! stop_gc();
//! ```
//!
//! ## Details
//! Call [start_gc] (or [start_gc_with]) once per process before the first
//! operation. Declare every participating word as an [AtomicField], obtain a
//! descriptor with [get_descriptor], register up to [MWCAS_CAPACITY] targets
//! with [MwCasDescriptor::add_target], and call [MwCasDescriptor::execute].
//! Words that participate in operations must always be observed through
//! [read], which resolves in-flight operations instead of exposing their
//! internal state.
//!
//! # Limitations
//! ## Values lose one bit
//! The most significant bit of every target word distinguishes client values
//! from embedded descriptor references. Eligible value types are therefore
//! the machine-word unsigned integer (with the top bit clear) and thin
//! pointers, whose addresses never set that bit on the supported platforms.
//! Ineligible types are rejected at compile time via the [MwCasValue] bound.
//!
//! ## One registration per address
//! Registering the same address twice within one descriptor is not
//! supported; debug builds panic on the attempt.
//!
//! ## Target cells outlive their operations
//! Completion of a finished operation is deferred and batched, so target
//! cells must stay alive until the threads that operated on them have exited
//! or [stop_gc] has run.
#![warn(missing_debug_implementations, missing_docs)]

mod batch;
mod descriptor;
mod epoch;
mod err;
mod field;
mod gc;
mod reader;
mod status;
mod sync;
mod word;

#[cfg(test)]
mod test_support;

pub use descriptor::MwCasDescriptor;
pub use err::InvalidStatusError;
pub use field::{AtomicField, MwCasValue};
pub use gc::{
    get_descriptor, start_gc, start_gc_with, stop_gc, DEFAULT_GC_INTERVAL, DEFAULT_GC_WORKERS,
};
pub use reader::read;
pub use status::Status;

/// Maximum number of target words per descriptor.
pub const MWCAS_CAPACITY: usize = 4;

/// Number of finished descriptors a thread buffers before completing and
/// retiring them in one batch.
pub const FINISHED_DESCRIPTOR_THRESHOLD: usize = 64;
