//! The single-assignment cell behind every future and promise.
//!
//! All transitions go through one `parking_lot::Mutex`. Resolution swaps the
//! pending waiter list out under the lock, publishes availability, wakes
//! blocked threads and only then runs the waiters with the lock released.
//! Registration checks the state under the same lock, so a waiter is either
//! queued before resolution (and run by the resolving thread) or sees the
//! final state (and runs on the registering thread). Never both, never
//! neither.

use crate::error::RuntimeError;
use core::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Condvar, Mutex};

/// A callback run once the value is resolved, with the value itself.
pub(crate) type Waiter<T> = Box<dyn FnOnce(&AsyncValue<T>) + Send>;

enum State<T> {
    Unconstructed(Vec<Waiter<T>>),
    /// `None` once a non-duplicable value has been moved out.
    Concrete(Option<T>),
    Error(RuntimeError),
}

pub(crate) struct AsyncValue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    available: AtomicBool,
}

impl<T> AsyncValue<T> {
    pub(crate) fn unconstructed() -> Self {
        Self {
            state: Mutex::new(State::Unconstructed(Vec::new())),
            ready: Condvar::new(),
            available: AtomicBool::new(false),
        }
    }

    pub(crate) fn concrete(value: T) -> Self {
        Self {
            state: Mutex::new(State::Concrete(Some(value))),
            ready: Condvar::new(),
            available: AtomicBool::new(true),
        }
    }

    pub(crate) fn error(err: RuntimeError) -> Self {
        Self {
            state: Mutex::new(State::Error(err)),
            ready: Condvar::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Lock-free check. Only ever flips from `false` to `true`.
    pub(crate) fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Authoritative check, serialized with resolution.
    pub(crate) fn is_resolved(&self) -> bool {
        !matches!(*self.state.lock(), State::Unconstructed(_))
    }

    /// The stored error, if resolved with one.
    pub(crate) fn get_error(&self) -> Option<RuntimeError> {
        match &*self.state.lock() {
            State::Error(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub(crate) fn emplace(&self, value: T) {
        self.resolve(State::Concrete(Some(value)));
    }

    pub(crate) fn set_error(&self, err: RuntimeError) {
        self.resolve(State::Error(err));
    }

    fn resolve(&self, next: State<T>) {
        let waiters = {
            let mut state = self.state.lock();
            let State::Unconstructed(waiters) = &mut *state else {
                panic!("contract violation: completion signal resolved more than once");
            };
            let waiters = core::mem::take(waiters);
            *state = next;
            self.available.store(true, Ordering::Release);
            self.ready.notify_all();
            waiters
        };

        for waiter in waiters {
            waiter(self);
        }
    }

    /// Runs `waiter` once the value is resolved.
    pub(crate) fn and_then(&self, waiter: Waiter<T>) {
        {
            let mut state = self.state.lock();
            if let State::Unconstructed(waiters) = &mut *state {
                waiters.push(waiter);
                return;
            }
        }
        waiter(self);
    }

    pub(crate) fn block_until_ready(&self) {
        let mut state = self.state.lock();
        while matches!(*state, State::Unconstructed(_)) {
            self.ready.wait(&mut state);
        }
    }

    /// Clones the resolved result.
    ///
    /// # Panics
    ///
    /// Panics if the value is unresolved or was moved out.
    pub(crate) fn get(&self) -> Result<T, RuntimeError>
    where
        T: Clone,
    {
        match &*self.state.lock() {
            State::Concrete(Some(value)) => Ok(value.clone()),
            State::Error(err) => Err(err.clone()),
            State::Concrete(None) => {
                panic!("contract violation: completion signal value was already consumed")
            }
            State::Unconstructed(_) => panic!("completion signal read before it was ready"),
        }
    }

    /// Moves the resolved result out.
    ///
    /// # Panics
    ///
    /// Panics if the value is unresolved or was already moved out.
    pub(crate) fn take(&self) -> Result<T, RuntimeError> {
        match &mut *self.state.lock() {
            State::Concrete(slot) => match slot.take() {
                Some(value) => Ok(value),
                None => panic!("contract violation: completion signal value was already consumed"),
            },
            State::Error(err) => Err(err.clone()),
            State::Unconstructed(_) => panic!("completion signal read before it was ready"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn waiters_registered_before_resolution_run_once() {
        let value = AsyncValue::<u32>::unconstructed();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            value.and_then(Box::new(move |v: &AsyncValue<u32>| {
                assert_eq!(v.get(), Ok(7));
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        value.emplace(7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn waiters_registered_after_resolution_run_inline() {
        let value = AsyncValue::error(RuntimeError::internal("boom"));
        let hit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&hit);
        value.and_then(Box::new(move |v: &AsyncValue<()>| {
            assert!(v.get_error().is_some());
            flag.store(true, Ordering::SeqCst);
        }));
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn second_resolution_panics() {
        let value = AsyncValue::unconstructed();
        value.emplace(1);
        value.set_error(RuntimeError::internal("late"));
    }

    #[test]
    #[should_panic(expected = "already consumed")]
    fn second_take_panics() {
        let value = AsyncValue::concrete(String::from("once"));
        assert_eq!(value.take().as_deref(), Ok("once"));
        let _ = value.take();
    }
}
