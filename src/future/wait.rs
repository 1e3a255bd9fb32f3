//! `.await` support for completion signals.

use super::async_value::AsyncValue;
use super::Future;
use crate::error::Result;
use core::future::IntoFuture;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use parking_lot::Mutex;
use std::sync::Arc;

/// Adapter returned by `Future::into_future`.
///
/// Registers a single callback on the signal the first time it is polled
/// and wakes the most recent waker when the signal resolves.
pub struct WaitFuture<T> {
    future: Future<T>,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

impl<T: Clone + Send + 'static> core::future::Future for WaitFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.future.is_known_ready() {
            return Poll::Ready(this.future.value.get());
        }

        if let Some(slot) = &this.waker {
            *slot.lock() = Some(cx.waker().clone());
        } else {
            let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
            let wake_slot = Arc::clone(&slot);
            this.waker = Some(slot);
            this.future
                .value
                .and_then(Box::new(move |_: &AsyncValue<T>| {
                    if let Some(waker) = wake_slot.lock().take() {
                        waker.wake();
                    }
                }));
        }

        // The signal may have resolved while the waker was being stored.
        if this.future.is_known_ready() {
            Poll::Ready(this.future.value.get())
        } else {
            Poll::Pending
        }
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Future<T> {
    type Output = Result<T>;
    type IntoFuture = WaitFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        WaitFuture {
            future: self,
            waker: None,
        }
    }
}
