use std::mem::take;
use std::sync::PoisonError;
use std::task::Waker;

use crate::sync::Mutex;

/// [`WaitQueue`] implements an unfair wait queue for asynchronous tasks.
///
/// The sole purpose of the data structure is to avoid busy-waiting: a task that failed to
/// acquire a resource parks its [`Waker`] in the queue, and the owner of the resource wakes up
/// every parked task when it releases the resource.
#[derive(Debug)]
pub(crate) struct WaitQueue {
    /// Wakers of the tasks waiting for a signal.
    wakers: Mutex<Vec<Waker>>,
}

impl Default for WaitQueue {
    #[inline]
    fn default() -> Self {
        Self {
            wakers: Mutex::new(Vec::new()),
        }
    }
}

impl WaitQueue {
    /// Pushes the [`Waker`] into the [`WaitQueue`], and then retries `f`.
    ///
    /// Retrying after the [`Waker`] is registered makes sure that a signal sent between the
    /// first failed attempt and the registration is not lost. If `f` succeeds, the [`Waker`]
    /// remains in the queue and it will be woken up spuriously.
    #[inline]
    pub(crate) fn push_async_entry<T, F: FnOnce() -> Option<T>>(
        &self,
        waker: &Waker,
        f: F,
    ) -> Option<T> {
        {
            let mut wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
            if !wakers.iter().any(|w| w.will_wake(waker)) {
                wakers.push(waker.clone());
            }
        }
        f()
    }

    /// Signals the tasks in the wait queue.
    #[inline]
    pub(crate) fn signal(&self) {
        let wakers = take(&mut *self.wakers.lock().unwrap_or_else(PoisonError::into_inner));

        // Wake up the oldest entries first.
        wakers.into_iter().for_each(Waker::wake);
    }
}
