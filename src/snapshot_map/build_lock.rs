//! Locks guarding snapshot construction.

use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::PoisonError;
use std::task::{Context, Poll};

use crate::sync::{spin_loop, yield_now, AtomicBool, Mutex, MutexGuard};
use crate::wait_queue::WaitQueue;

/// The number of failed attempts after which the polling bridge yields the thread.
const SPINS_BEFORE_YIELD: u32 = 64;

/// [`BuildLock`] is an exclusive region in which a snapshot is built.
///
/// Only snapshot construction is guarded by the lock; mutations never acquire it.
pub trait BuildLock: Default {
    /// The guard that releases the lock when dropped.
    type Guard<'l>
    where
        Self: 'l;

    /// Acquires the lock from a synchronous context.
    fn lock_sync(&self) -> Self::Guard<'_>;
}

/// [`BlockingBuildLock`] blocks the calling thread until the lock is acquired.
pub struct BlockingBuildLock {
    mutex: Mutex<()>,
}

impl BuildLock for BlockingBuildLock {
    type Guard<'l> = MutexGuard<'l, ()>;

    #[inline]
    fn lock_sync(&self) -> Self::Guard<'_> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BlockingBuildLock {
    #[inline]
    fn default() -> Self {
        Self {
            mutex: Mutex::new(()),
        }
    }
}

impl Debug for BlockingBuildLock {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingBuildLock").finish_non_exhaustive()
    }
}

/// [`SuspendingBuildLock`] suspends the calling task instead of blocking the thread.
///
/// Asynchronous callers use [`SuspendingBuildLock::lock_async`] which parks the task until the
/// lock is released. Synchronous callers cannot suspend, so [`BuildLock::lock_sync`] polls the
/// lock, issuing a spin hint after each failed attempt and yielding the thread once in a
/// while. The lock is only held for a single linear copy of the table.
#[derive(Debug)]
pub struct SuspendingBuildLock {
    locked: AtomicBool,
    wait_queue: WaitQueue,
}

/// [`SuspendingBuildLockGuard`] releases the [`SuspendingBuildLock`] when dropped.
#[derive(Debug)]
pub struct SuspendingBuildLockGuard<'l> {
    lock: &'l SuspendingBuildLock,
}

/// [`LockAsync`] is the future returned by [`SuspendingBuildLock::lock_async`].
#[derive(Debug)]
pub struct LockAsync<'l> {
    lock: &'l SuspendingBuildLock,
}

impl SuspendingBuildLock {
    /// Tries to acquire the lock without waiting.
    #[inline]
    pub fn try_lock(&self) -> Option<SuspendingBuildLockGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Acquire, Relaxed)
            .ok()
            .map(|_| SuspendingBuildLockGuard { lock: self })
    }

    /// Acquires the lock, suspending the current task while the lock is held by another
    /// thread or task.
    #[inline]
    pub fn lock_async(&self) -> LockAsync<'_> {
        LockAsync { lock: self }
    }

    /// Releases the lock and wakes up waiting tasks.
    #[inline]
    fn unlock(&self) {
        self.locked.store(false, Release);
        self.wait_queue.signal();
    }
}

impl Default for SuspendingBuildLock {
    #[inline]
    fn default() -> Self {
        Self {
            locked: AtomicBool::new(false),
            wait_queue: WaitQueue::default(),
        }
    }
}

impl BuildLock for SuspendingBuildLock {
    type Guard<'l> = SuspendingBuildLockGuard<'l>;

    #[inline]
    fn lock_sync(&self) -> Self::Guard<'_> {
        let mut attempts = 0_u32;
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            attempts = attempts.wrapping_add(1);
            if attempts % SPINS_BEFORE_YIELD == 0 {
                yield_now();
            } else {
                spin_loop();
            }
        }
    }
}

impl Drop for SuspendingBuildLockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<'l> Future for LockAsync<'l> {
    type Output = SuspendingBuildLockGuard<'l>;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let lock = self.lock;
        if let Some(guard) = lock.try_lock() {
            return Poll::Ready(guard);
        }
        match lock.wait_queue.push_async_entry(cx.waker(), || lock.try_lock()) {
            Some(guard) => Poll::Ready(guard),
            None => Poll::Pending,
        }
    }
}
