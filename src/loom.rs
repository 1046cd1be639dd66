pub(crate) mod models {
    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::lock::Variant;
    use crate::mutex::yields::Mutex;

    /// Two threads, one guarded increment each: the release of either must
    /// be visible to the acquire of the other.
    pub fn lock_join(variant: Variant) {
        model(move || {
            let data = Arc::new(Mutex::new(variant, 0u32));
            let handle = {
                let data = Arc::clone(&data);
                thread::spawn(move || {
                    data.lock_with(|mut guard| guard.with_mut(|value| *value += 1));
                })
            };
            data.lock_with(|mut guard| guard.with_mut(|value| *value += 1));
            handle.join().unwrap();

            let value = data.lock_with(|guard| guard.with(|value| *value));
            assert_eq!(value, 2);
        });
    }

    /// Two threads racing try-acquire: the final count must equal the
    /// number of successful attempts.
    pub fn try_lock_join(variant: Variant) {
        fn bump(data: &Arc<Mutex<u32>>) -> bool {
            data.try_lock_with(|guard| match guard {
                Some(mut guard) => {
                    guard.with_mut(|value| *value += 1);
                    true
                }
                None => false,
            })
        }

        model(move || {
            let data = Arc::new(Mutex::new(variant, 0u32));
            let handle = {
                let data = Arc::clone(&data);
                thread::spawn(move || bump(&data))
            };
            let here = bump(&data);
            let there = handle.join().unwrap();

            let value = data.lock_with(|guard| guard.with(|value| *value));
            assert_eq!(value, u32::from(here) + u32::from(there));
        });
    }
}
