//! Completion signal fed by a known number of sub-completions.

use super::async_value::AsyncValue;
use super::Future;
use crate::error::RuntimeError;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;

struct CountDownState<T> {
    value: Arc<AsyncValue<T>>,
    count: AtomicUsize,
    payload: Mutex<Option<T>>,
    first_error: Mutex<Option<RuntimeError>>,
}

/// Resolves its signal once [`count_down`](Self::count_down) has been called
/// `count` times.
///
/// Clones share the counter, so each piece of dispatched work can hold its
/// own handle. Decrements may race freely: exactly one of them, the one
/// that brings the counter to zero, resolves the signal.
///
/// If any decrement reported an error the signal resolves with the first
/// recorded error instead of the payload.
pub struct CountDown<T> {
    state: Arc<CountDownState<T>>,
}

impl<T> Clone for CountDown<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for CountDown<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDown")
            .field("remaining", &self.state.count.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T: Default + Send + 'static> CountDown<T> {
    /// A countdown resolving with `T::default()`.
    pub fn new(count: usize) -> Self {
        Self::with_value(T::default(), count)
    }
}

impl<T: Send + 'static> CountDown<T> {
    /// A countdown resolving with `value`.
    ///
    /// A zero `count` resolves immediately.
    pub fn with_value(value: T, count: usize) -> Self {
        let state = if count == 0 {
            CountDownState {
                value: Arc::new(AsyncValue::concrete(value)),
                count: AtomicUsize::new(0),
                payload: Mutex::new(None),
                first_error: Mutex::new(None),
            }
        } else {
            CountDownState {
                value: Arc::new(AsyncValue::unconstructed()),
                count: AtomicUsize::new(count),
                payload: Mutex::new(Some(value)),
                first_error: Mutex::new(None),
            }
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Records one successful sub-completion.
    ///
    /// Returns `true` for the call that resolved the signal.
    ///
    /// # Panics
    ///
    /// Panics if called more times than the initial count.
    pub fn count_down(&self) -> bool {
        self.decrement()
    }

    /// Records one failed sub-completion.
    ///
    /// Only the first recorded error is kept.
    ///
    /// # Panics
    ///
    /// Panics if called more times than the initial count.
    pub fn count_down_with_error(&self, err: RuntimeError) -> bool {
        {
            let mut first = self.state.first_error.lock();
            if first.is_none() {
                *first = Some(err);
            }
        }
        self.decrement()
    }

    fn decrement(&self) -> bool {
        let previous = self
            .state
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        match previous {
            Ok(1) => {
                self.resolve();
                true
            }
            Ok(_) => false,
            Err(_) => panic!("contract violation: count down called more times than its count"),
        }
    }

    fn resolve(&self) {
        if let Some(err) = self.state.first_error.lock().take() {
            log::trace!("count down reached zero with error: {err}");
            self.state.value.set_error(err);
            return;
        }
        match self.state.payload.lock().take() {
            Some(value) => {
                log::trace!("count down reached zero");
                self.state.value.emplace(value);
            }
            None => panic!("contract violation: count down payload already delivered"),
        }
    }

    /// Decrements still needed before the signal resolves.
    pub fn remaining(&self) -> usize {
        self.state.count.load(Ordering::Acquire)
    }

    /// The aggregated signal.
    pub fn as_future(&self) -> Future<T> {
        Future::from_value(Arc::clone(&self.state.value))
    }
}
