//! Re-exports synchronization primitives from `std`, `loom`, or `shuttle`
//! depending on how the crate is built, so the rest of the crate can stay
//! oblivious to which of the three is in play.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
        pub(crate) use loom::sync::{Arc, Mutex};
        pub(crate) use loom::thread_local;
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
        pub(crate) use shuttle::sync::{Arc, Mutex};
        pub(crate) use shuttle::thread_local;
    } else {
        pub(crate) use std::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
        pub(crate) use std::sync::{Arc, Mutex};
        pub(crate) use std::thread_local;
    }
}
