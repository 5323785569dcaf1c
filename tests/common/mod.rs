cfg_if::cfg_if! {
    if #[cfg(feature = "shuttle")] {
        use std::time::Duration;

        use mwcas::{get_descriptor, read, start_gc_with, stop_gc, AtomicField};
        use shuttle::thread;

        /// Two threads race a two-word CAS over the same pair of targets;
        /// exactly one of them may win, and both words must move together.
        ///
        /// Runs the gc without background workers so that every thread the
        /// scheduler sees is one it controls, and tears the gc down at the
        /// end so each explored execution starts from a clean slate.
        pub fn contention_scenario() {
            start_gc_with(Duration::from_millis(1), 0);

            let first: &'static AtomicField = Box::leak(Box::new(AtomicField::new(0usize)));
            let second: &'static AtomicField = Box::leak(Box::new(AtomicField::new(0usize)));

            let handles: Vec<thread::JoinHandle<bool>> = (0..2usize)
                .map(|i| {
                    thread::spawn(move || {
                        let mut descriptor = get_descriptor();
                        assert!(descriptor.add_target(first, 0usize, i + 1));
                        assert!(descriptor.add_target(second, 0usize, i + 1));
                        descriptor.execute()
                    })
                })
                .collect();

            let outcomes: Vec<bool> = handles
                .into_iter()
                .map(|handle| handle.join().expect("a racing thread panicked"))
                .collect();
            assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);

            let first_value: usize = read(first);
            let second_value: usize = read(second);
            assert_eq!(first_value, second_value);
            assert!(first_value == 1 || first_value == 2);

            stop_gc();
        }
    } else {
        use std::sync::Once;

        static GC: Once = Once::new();

        /// Start the process-wide gc once for this test binary. Tests within
        /// one binary run concurrently, so nobody ever stops it; teardown is
        /// covered by the lifecycle test, which runs in its own process.
        pub fn ensure_gc() {
            GC.call_once(mwcas::start_gc);
        }
    }
}
