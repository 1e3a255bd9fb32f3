use briny_rt::error::RuntimeError;
use briny_rt::future::{CountDown, Future, ProfilingKeys, Promise, join_futures};
use briny_rt::pool::{ThreadPool, default_pool};
use core::future::IntoFuture;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_join_succeeds_after_all_inputs() {
    let promises = (0..3).map(|_| Promise::<u8>::new()).collect::<Vec<_>>();
    let futures = promises.iter().map(Promise::future).collect::<Vec<_>>();
    let joined = join_futures(&futures);

    promises[2].set(2);
    promises[0].set(0);
    assert!(!joined.is_ready());
    promises[1].set(1);
    assert!(joined.is_known_ready());
    assert_eq!(joined.wait(), Ok(()));
}

#[test]
fn test_join_short_circuits_on_failure() {
    let a = Promise::<()>::new();
    let b = Promise::<()>::new();
    let c = Promise::<()>::new();
    let joined = join_futures(&[a.future(), b.future(), c.future()]);

    a.set(());
    b.set_error(RuntimeError::internal("b failed"));

    // c is still pending, the join does not wait for it.
    assert!(!c.future().is_ready());
    assert_eq!(joined.wait(), Err(RuntimeError::internal("b failed")));

    c.set(());
    assert_eq!(joined.wait(), Err(RuntimeError::internal("b failed")));
}

#[test]
fn test_readiness_is_monotonic_across_threads() {
    let promise = Promise::<u64>::new();
    let future = promise.future();
    let stop = Arc::new(AtomicBool::new(false));

    let watchers = (0..4)
        .map(|_| {
            let future = future.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen_known = false;
                let mut seen_ready = false;
                while !stop.load(Ordering::Acquire) {
                    let known = future.is_known_ready();
                    let ready = future.is_ready();
                    assert!(!seen_known || known, "is_known_ready went back to false");
                    assert!(!seen_ready || ready, "is_ready went back to false");
                    assert!(!known || ready, "known ready but not ready");
                    seen_known |= known;
                    seen_ready |= ready;
                }
                seen_ready
            })
        })
        .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(5));
    promise.set(9);
    thread::sleep(Duration::from_millis(5));
    stop.store(true, Ordering::Release);

    for watcher in watchers {
        assert!(watcher.join().unwrap());
    }
    assert_eq!(future.wait(), Ok(9));
}

#[test]
fn test_block_hooks_wrap_blocking_waits() {
    let starts = Arc::new(AtomicUsize::new(0));
    let last_key = Arc::new(AtomicU64::new(0));

    let promise = Promise::<&'static str>::new();
    let future = {
        let starts = Arc::clone(&starts);
        let last_key = Arc::clone(&last_key);
        promise.future().with_block_hooks(
            move || {
                starts.fetch_add(1, Ordering::SeqCst);
                ProfilingKeys {
                    traceme_context_id: 77,
                }
            },
            move |keys| last_key.store(keys.traceme_context_id, Ordering::SeqCst),
        )
    };

    // Resolve only once the waiter has announced that it is blocking.
    let writer = {
        let starts = Arc::clone(&starts);
        thread::spawn(move || {
            while starts.load(Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            promise.set("done");
        })
    };
    assert_eq!(future.wait(), Ok("done"));
    writer.join().unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(last_key.load(Ordering::SeqCst), 77);

    // Already resolved: no blocking, no hooks.
    assert_eq!(future.wait(), Ok("done"));
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_countdown_driven_by_pool() {
    let pool = default_pool().unwrap();
    let count = CountDown::<()>::new(32);
    let finished = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(usize::MAX));

    {
        let finished = Arc::clone(&finished);
        let observed = Arc::clone(&observed);
        count.as_future().on_ready(move |result| {
            assert_eq!(result, Ok(()));
            observed.store(finished.load(Ordering::SeqCst), Ordering::SeqCst);
        });
    }

    for _ in 0..32 {
        let count = count.clone();
        let finished = Arc::clone(&finished);
        pool.submit(Box::new(move || {
            finished.fetch_add(1, Ordering::SeqCst);
            count.count_down();
        }));
    }

    assert_eq!(count.as_future().wait(), Ok(()));
    // The callback fires from the last decrement, after every task's work.
    let mut spins = 0;
    while observed.load(Ordering::SeqCst) == usize::MAX && spins < 1000 {
        thread::sleep(Duration::from_millis(1));
        spins += 1;
    }
    assert_eq!(observed.load(Ordering::SeqCst), 32);
}

#[test]
fn test_unique_payload_moves_once() {
    let promise = Promise::<Vec<String>>::new();
    let future = promise.future();
    let (tx, rx) = std::sync::mpsc::channel();
    future.on_ready_unique(move |result| tx.send(result).unwrap());

    promise.set(vec!["owned".to_owned()]);
    assert_eq!(rx.recv().unwrap(), Ok(vec!["owned".to_owned()]));
}

#[test]
fn test_awaiting_a_promise() {
    let promise = Promise::<u32>::new();
    let future = promise.future();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        promise.set(11);
    });
    assert_eq!(pollster::block_on(future.into_future()), Ok(11));
    writer.join().unwrap();

    let failed = Future::<u32>::error(RuntimeError::unimplemented("nope"));
    assert!(pollster::block_on(failed.into_future()).is_err());
}
