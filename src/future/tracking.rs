//! Cross-subsystem dependency tracking.
//!
//! A [`ScopedAsyncTrackingEvent`] represents outstanding work owned by some
//! other subsystem. That subsystem decides when the event is finished; this
//! crate only tells it "not before this signal resolves" through
//! [`Future::assert_happens_before`](super::Future::assert_happens_before).

use super::async_value::AsyncValue;
use crate::error::{Result, RuntimeError};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;

/// An external event that may depend on completion signals.
pub trait ScopedAsyncTrackingEvent: Send + Sync {
    /// Records that this event cannot complete before `dependency` resolves.
    fn add_dependency(&self, dependency: Dependency);
}

/// Signal operations that do not depend on the payload type.
trait Tracked: Send + Sync {
    fn is_available(&self) -> bool;
    fn block_until_ready(&self);
    fn get_error(&self) -> Option<RuntimeError>;
    fn notify(&self, callback: Box<dyn FnOnce(Option<RuntimeError>) + Send>);
}

impl<T: Send + 'static> Tracked for AsyncValue<T> {
    fn is_available(&self) -> bool {
        AsyncValue::is_available(self)
    }

    fn block_until_ready(&self) {
        AsyncValue::block_until_ready(self);
    }

    fn get_error(&self) -> Option<RuntimeError> {
        AsyncValue::get_error(self)
    }

    fn notify(&self, callback: Box<dyn FnOnce(Option<RuntimeError>) + Send>) {
        self.and_then(Box::new(move |value: &AsyncValue<T>| {
            callback(value.get_error());
        }));
    }
}

/// A payload-free reference to a completion signal.
///
/// Keeps the signal alive; observes only whether and how it resolved.
#[derive(Clone)]
pub struct Dependency {
    signal: Arc<dyn Tracked>,
}

impl Dependency {
    pub(crate) fn new<T: Send + 'static>(signal: Arc<AsyncValue<T>>) -> Self {
        Self { signal }
    }

    /// Whether the signal is known to be resolved.
    pub fn is_ready(&self) -> bool {
        self.signal.is_available()
    }

    /// Blocks until the signal resolves and reports its status.
    ///
    /// # Errors
    ///
    /// Returns the error the signal was resolved with.
    pub fn wait(&self) -> Result<()> {
        self.signal.block_until_ready();
        self.signal.get_error().map_or(Ok(()), Err)
    }

    fn succeeded(&self) -> bool {
        self.is_ready() && self.signal.get_error().is_none()
    }

    /// Runs `callback` with the signal's status once it resolves.
    pub fn on_ready(&self, callback: impl FnOnce(Result<()>) + Send + 'static) {
        self.signal.notify(Box::new(move |error: Option<RuntimeError>| {
            callback(error.map_or(Ok(()), Err));
        }));
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A tracking event that records its dependencies.
///
/// Counts dependencies that have not resolved yet and can block until all of
/// them have. Dropping the tracker with dependencies still outstanding is
/// logged, since the owning subsystem then finishes before its inputs.
///
/// Dependencies that resolved successfully are released the next time one is
/// added, so a long-lived tracker only holds pending and failed signals.
pub struct DependencyTracker {
    name: String,
    recorded: AtomicUsize,
    outstanding: Arc<AtomicUsize>,
    dependencies: Mutex<Vec<Dependency>>,
}

impl DependencyTracker {
    /// A tracker with no dependencies, named for logging.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recorded: AtomicUsize::new(0),
            outstanding: Arc::new(AtomicUsize::new(0)),
            dependencies: Mutex::new(Vec::new()),
        }
    }

    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of dependencies recorded over the tracker's lifetime.
    pub fn len(&self) -> usize {
        self.recorded.load(Ordering::Acquire)
    }

    /// Whether no dependency was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of signals still held: pending or failed ones, plus successful
    /// ones not yet released.
    pub fn held(&self) -> usize {
        self.dependencies.lock().len()
    }

    /// Number of recorded dependencies that have not resolved yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Blocks until every recorded dependency has resolved.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed dependency, in recording order.
    pub fn wait_all(&self) -> Result<()> {
        let dependencies = self.dependencies.lock().clone();
        let mut first_error = None;
        for dependency in &dependencies {
            if let Err(err) = dependency.wait() {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl ScopedAsyncTrackingEvent for DependencyTracker {
    fn add_dependency(&self, dependency: Dependency) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = Arc::clone(&self.outstanding);
        dependency.on_ready(move |_| {
            outstanding.fetch_sub(1, Ordering::AcqRel);
        });
        self.recorded.fetch_add(1, Ordering::AcqRel);

        let mut dependencies = self.dependencies.lock();
        dependencies.retain(|held| !held.succeeded());
        dependencies.push(dependency);
    }
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("name", &self.name)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl Drop for DependencyTracker {
    fn drop(&mut self) {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            log::warn!(
                "tracking event `{}` finished with {outstanding} unresolved dependencies",
                self.name
            );
        }
    }
}
