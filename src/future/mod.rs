//! Completion signals: single-assignment futures and promises.
//!
//! # Overview
//!
//! A [`Promise`] is the write side of a completion signal, a [`Future`] is
//! the read side. Both are cheap handles around one shared cell; cloning
//! either one shares the cell, and the cell lives until the last handle is
//! dropped.
//!
//! The cell starts pending and moves exactly once to either a value or a
//! [`RuntimeError`]. That state is terminal: readers may wait on it, peek
//! at it or register callbacks, but never see it change again.
//!
//! ## Reading
//!
//! - [`Future::wait`] blocks the calling thread (running the optional
//!   block hooks around the wait).
//! - [`Future::on_ready`] registers a callback. It runs inline when the
//!   signal is already resolved, otherwise on the thread that resolves it.
//! - [`Future::is_ready`] / [`Future::is_known_ready`] peek without
//!   blocking; the second one never takes a lock and may lag behind.
//! - `Future<T>` is also [`IntoFuture`](core::future::IntoFuture), so it
//!   can be `.await`ed.
//!
//! ## Writing
//!
//! [`Promise::set`] or [`Promise::set_error`], exactly once across all
//! clones. A second write panics: it is a contract violation, not an error
//! to recover from.
//!
//! ## Aggregation
//!
//! - [`join_futures`] waits for a set of signals and fails fast on the
//!   first error.
//! - [`CountDown`] resolves after a known number of sub-completions.
//!
//! # Example
//!
//! ```rust
//! use briny_rt::future::{Future, Promise};
//!
//! let promise = Promise::new();
//! let future: Future<u32> = promise.future();
//! assert!(!future.is_known_ready());
//!
//! std::thread::spawn(move || promise.set(42));
//! assert_eq!(future.wait(), Ok(42));
//! ```

mod async_value;
mod countdown;
mod tracking;
mod wait;

pub use self::countdown::CountDown;
pub use self::tracking::{Dependency, DependencyTracker, ScopedAsyncTrackingEvent};
pub use self::wait::WaitFuture;

use self::async_value::AsyncValue;
use crate::error::{Result, RuntimeError};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Keys handed from the block-start hook to the block-end hook.
///
/// Carries an identifier a profiler can use to pair the two events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfilingKeys {
    /// Context id of the trace event opened when blocking started.
    pub traceme_context_id: u64,
}

impl Default for ProfilingKeys {
    fn default() -> Self {
        Self {
            traceme_context_id: u64::MAX,
        }
    }
}

/// Hook called right before a thread blocks on a future.
pub type OnBlockStartFn = Arc<dyn Fn() -> ProfilingKeys + Send + Sync>;

/// Hook called right after a thread stops blocking on a future.
pub type OnBlockEndFn = Arc<dyn Fn(ProfilingKeys) + Send + Sync>;

/// A completion signal without a payload.
pub type Event = Future<()>;

/// The write side of an [`Event`].
pub type EventPromise = Promise<()>;

/// The read side of a completion signal.
pub struct Future<T> {
    value: Arc<AsyncValue<T>>,
    on_block_start: Option<OnBlockStartFn>,
    on_block_end: Option<OnBlockEndFn>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            on_block_start: self.on_block_start.clone(),
            on_block_end: self.on_block_end.clone(),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.value.is_available())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Future<T> {
    fn from_value(value: Arc<AsyncValue<T>>) -> Self {
        Self {
            value,
            on_block_start: None,
            on_block_end: None,
        }
    }

    /// A future that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        Self::from_value(Arc::new(AsyncValue::concrete(value)))
    }

    /// A future that is already resolved with `err`.
    ///
    /// Used to report failures eagerly when no asynchronous work will run.
    pub fn error(err: RuntimeError) -> Self {
        Self::from_value(Arc::new(AsyncValue::error(err)))
    }

    /// A future already resolved with the given outcome.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ready(value),
            Err(err) => Self::error(err),
        }
    }

    /// The read side of `promise`.
    pub fn from_promise(promise: &Promise<T>) -> Self {
        Self::from_value(Arc::clone(&promise.value))
    }

    /// Attaches instrumentation hooks run around blocking waits.
    ///
    /// The keys returned by `on_block_start` are passed to `on_block_end`.
    /// Hooks never influence the result of a wait.
    #[must_use]
    pub fn with_block_hooks(
        mut self,
        on_block_start: impl Fn() -> ProfilingKeys + Send + Sync + 'static,
        on_block_end: impl Fn(ProfilingKeys) + Send + Sync + 'static,
    ) -> Self {
        self.on_block_start = Some(Arc::new(on_block_start));
        self.on_block_end = Some(Arc::new(on_block_end));
        self
    }

    /// Whether the future is resolved.
    ///
    /// Synchronizes with the writer, so it returns `true` whenever the
    /// signal was resolved before this call started.
    pub fn is_ready(&self) -> bool {
        self.value.is_resolved()
    }

    /// Whether the future is known to be resolved, without locking.
    ///
    /// May report `false` for a signal resolved concurrently with the call.
    /// Once it reports `true` it never reports `false` again.
    pub fn is_known_ready(&self) -> bool {
        self.value.is_available()
    }

    /// Declares that `event` cannot complete before this future is resolved.
    ///
    /// A `None` event is accepted and ignored.
    pub fn assert_happens_before(&self, event: Option<&dyn ScopedAsyncTrackingEvent>) {
        if let Some(event) = event {
            event.add_dependency(self.dependency());
        }
    }

    /// A type-erased handle on this signal, for dependency tracking.
    pub fn dependency(&self) -> Dependency {
        Dependency::new(Arc::clone(&self.value))
    }

    /// Blocks until resolved, running the block hooks if a wait is needed.
    fn block(&self) {
        if self.value.is_available() {
            return;
        }
        let keys = self
            .on_block_start
            .as_ref()
            .map_or_else(ProfilingKeys::default, |start| start());
        self.value.block_until_ready();
        if let Some(end) = &self.on_block_end {
            end(keys);
        }
    }

    /// Blocks until resolved and moves the value out.
    ///
    /// For payloads that cannot be duplicated. Only one consumer may take
    /// the value across all clones of this future.
    ///
    /// # Errors
    ///
    /// Returns the error the signal was resolved with.
    ///
    /// # Panics
    ///
    /// Panics if the value was already moved out by another consumer.
    pub fn wait_unique(self) -> Result<T> {
        self.block();
        self.value.take()
    }

    /// Registers `callback` to receive the moved-out value once resolved.
    ///
    /// Registering a second unique consumer is a contract violation; the
    /// second callback panics when it runs.
    pub fn on_ready_unique(&self, callback: impl FnOnce(Result<T>) + Send + 'static) {
        self.value
            .and_then(Box::new(move |value: &AsyncValue<T>| callback(value.take())));
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Blocks the calling thread until resolved and returns the outcome.
    ///
    /// # Errors
    ///
    /// Returns the error the signal was resolved with.
    pub fn wait(&self) -> Result<T> {
        self.block();
        self.value.get()
    }

    /// Registers `callback` to run exactly once with the outcome.
    ///
    /// If the future is already resolved the callback runs before this call
    /// returns. Otherwise it runs on whichever thread resolves the signal, so
    /// it must not block on signals that thread is responsible for.
    pub fn on_ready(&self, callback: impl FnOnce(Result<T>) + Send + 'static) {
        self.value
            .and_then(Box::new(move |value: &AsyncValue<T>| callback(value.get())));
    }
}

/// The write side of a completion signal.
pub struct Promise<T> {
    value: Arc<AsyncValue<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("fulfilled", &self.value.is_available())
            .finish()
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// A pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Arc::new(AsyncValue::unconstructed()),
        }
    }

    /// A promise that is already fulfilled with `value`.
    pub fn available(value: T) -> Self {
        Self {
            value: Arc::new(AsyncValue::concrete(value)),
        }
    }

    /// A future observing this promise.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        Future::from_promise(self)
    }

    /// Fulfills the promise.
    ///
    /// # Panics
    ///
    /// Panics if the promise (or any clone of it) was already fulfilled.
    pub fn set(&self, value: T) {
        self.value.emplace(value);
    }

    /// Fails the promise.
    ///
    /// # Panics
    ///
    /// Panics if the promise (or any clone of it) was already fulfilled.
    pub fn set_error(&self, err: RuntimeError) {
        self.value.set_error(err);
    }
}

impl Promise<()> {
    /// Marks a payload-free promise as completed.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already fulfilled.
    pub fn set_concrete(&self) {
        self.set(());
    }
}

struct JoinState {
    remaining: AtomicUsize,
    resolved: AtomicBool,
    promise: Promise<()>,
}

impl JoinState {
    fn fail(&self, err: RuntimeError) {
        if !self.resolved.swap(true, Ordering::AcqRel) {
            self.promise.set_error(err);
        }
    }

    fn succeed_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.resolved.swap(true, Ordering::AcqRel)
        {
            self.promise.set_concrete();
        }
    }
}

/// Joins `futures` into one event.
///
/// The event succeeds once every input has succeeded. It fails as soon as
/// any input fails, without waiting for the others. Inputs are inspected in
/// order, so if several are already failed when the join is built, the
/// error of the lowest-indexed one is reported. An empty input succeeds
/// immediately.
///
/// # Example
///
/// ```rust
/// use briny_rt::future::{join_futures, Future, Promise};
///
/// let a = Promise::new();
/// let b = Promise::new();
/// let joined = join_futures(&[a.future(), b.future()]);
/// a.set(());
/// assert!(!joined.is_ready());
/// b.set(());
/// assert_eq!(joined.wait(), Ok(()));
/// ```
pub fn join_futures<T: Send + 'static>(futures: &[Future<T>]) -> Event {
    if futures.is_empty() {
        return Future::ready(());
    }

    let promise = Promise::new();
    let joined = promise.future();
    let state = Arc::new(JoinState {
        remaining: AtomicUsize::new(futures.len()),
        resolved: AtomicBool::new(false),
        promise,
    });

    for future in futures {
        let state = Arc::clone(&state);
        future
            .value
            .and_then(Box::new(move |value: &AsyncValue<T>| match value.get_error() {
                Some(err) => state.fail(err),
                None => state.succeed_one(),
            }));
    }

    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ready_and_error_constructors_are_resolved() {
        let ok = Future::ready(5u8);
        assert!(ok.is_ready() && ok.is_known_ready());
        assert_eq!(ok.wait(), Ok(5));

        let err = Future::<u8>::error(RuntimeError::internal("x"));
        assert_eq!(err.wait(), Err(RuntimeError::internal("x")));

        let available = Promise::available(9u8);
        assert_eq!(available.future().wait(), Ok(9));
    }

    #[test]
    fn wait_blocks_until_another_thread_sets() {
        let promise = Promise::new();
        let future = promise.future();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set(String::from("done"));
        });
        assert_eq!(future.wait().as_deref(), Ok("done"));
        writer.join().unwrap();
    }

    #[test]
    fn block_hooks_bracket_a_real_wait() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let start_log = Arc::clone(&log);
        let end_log = Arc::clone(&log);

        let promise = Promise::<()>::new();
        let future = promise
            .future()
            .with_block_hooks(
                move || {
                    start_log.lock().unwrap().push(String::from("start"));
                    ProfilingKeys {
                        traceme_context_id: 17,
                    }
                },
                move |keys| end_log.lock().unwrap().push(format!("end:{}", keys.traceme_context_id)),
            );

        let started = Arc::clone(&log);
        let writer = thread::spawn(move || {
            while started.lock().unwrap().is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
            promise.set_concrete();
        });
        assert_eq!(future.wait(), Ok(()));
        writer.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["start", "end:17"]);

        // Already resolved: no hooks.
        assert_eq!(future.wait(), Ok(()));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn on_ready_runs_inline_when_already_resolved() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        Future::ready(3i32).on_ready(move |result| *slot.lock().unwrap() = Some(result));
        assert_eq!(*seen.lock().unwrap(), Some(Ok(3)));
    }

    #[test]
    fn on_ready_runs_on_the_resolving_thread() {
        let promise = Promise::<u64>::new();
        let (tx, rx) = std::sync::mpsc::channel();
        promise.future().on_ready(move |result| {
            tx.send((result, thread::current().name().map(String::from))).unwrap();
        });

        thread::Builder::new()
            .name(String::from("resolver"))
            .spawn(move || promise.set(11))
            .unwrap()
            .join()
            .unwrap();

        let (result, name) = rx.recv().unwrap();
        assert_eq!(result, Ok(11));
        assert_eq!(name.as_deref(), Some("resolver"));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn setting_a_promise_twice_panics() {
        let promise = Promise::new();
        promise.set(1u32);
        promise.clone().set(2);
    }

    #[test]
    fn unique_values_move_to_one_consumer() {
        struct NoClone(u8);

        let promise = Promise::new();
        let future = promise.future();
        promise.set(NoClone(4));
        assert_eq!(future.wait_unique().map(|v| v.0), Ok(4));
    }

    #[test]
    fn join_fails_fast_on_first_error() {
        let a = Promise::<()>::new();
        let b = Promise::<()>::new();
        let c = Promise::<()>::new();
        let joined = join_futures(&[a.future(), b.future(), c.future()]);

        a.set_concrete();
        assert!(!joined.is_ready());
        b.set_error(RuntimeError::internal("b failed"));
        assert_eq!(joined.wait(), Err(RuntimeError::internal("b failed")));

        // c resolving later must not disturb the joined result.
        c.set_concrete();
        assert_eq!(joined.wait(), Err(RuntimeError::internal("b failed")));
    }

    #[test]
    fn join_prefers_lowest_index_among_prior_errors() {
        let futures = [
            Future::ready(()),
            Future::error(RuntimeError::internal("second")),
            Future::error(RuntimeError::internal("third")),
        ];
        assert_eq!(
            join_futures(&futures).wait(),
            Err(RuntimeError::internal("second"))
        );
    }

    #[test]
    fn empty_join_is_ready() {
        assert!(join_futures::<()>(&[]).is_known_ready());
    }
}
