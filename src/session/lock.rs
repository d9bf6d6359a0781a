//! FIFO-fair exclusive lock guarding the single device session.
//!
//! The protected value travels with the lock. A queued waiter is handed the
//! value through its own oneshot channel, so the lock is never observed free
//! while somebody is still waiting for it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Exclusive lock with a strictly ordered wait queue
pub struct ExclusiveLock<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<LockState<T>>,
}

struct LockState<T> {
    /// `Some` exactly when the lock is free
    value: Option<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

impl<T> ExclusiveLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LockState {
                    value: Some(value),
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Acquire the lock, suspending behind earlier callers if it is held.
    ///
    /// A free lock is granted without suspending. Dropping the returned
    /// future while queued gives up the place in line without disturbing the
    /// order of the remaining waiters.
    pub async fn acquire(&self) -> LockGuard<T> {
        loop {
            let receiver = {
                let mut state = self.shared.state();
                if let Some(value) = state.value.take() {
                    return LockGuard::new(self.shared.clone(), value);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            let mut waiter = Waiter {
                shared: &self.shared,
                receiver,
            };

            if let Ok(value) = waiter.wait().await {
                return LockGuard::new(self.shared.clone(), value);
            }
            // The sender went away without a hand-off; take a new place in line.
        }
    }

    /// Acquire only if the lock is currently free
    pub fn try_acquire(&self) -> Option<LockGuard<T>> {
        let value = self.shared.state().value.take()?;
        Some(LockGuard::new(self.shared.clone(), value))
    }

    pub fn is_held(&self) -> bool {
        self.shared.state().value.is_none()
    }

    /// Number of callers still waiting for the lock
    pub fn queue_len(&self) -> usize {
        self.shared
            .state()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }
}

impl<T> Clone for ExclusiveLock<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, LockState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the value to the oldest waiter still listening, or mark the lock free.
    fn release(&self, mut value: T) {
        let mut state = self.state();
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(value) {
                Ok(()) => return,
                Err(returned) => value = returned,
            }
        }
        state.value = Some(value);
    }
}

/// A queued acquisition. If it is dropped after the lock was handed to it but
/// before the value was observed, the lock moves on to the next waiter.
struct Waiter<'a, T> {
    shared: &'a Shared<T>,
    receiver: oneshot::Receiver<T>,
}

impl<T> Waiter<'_, T> {
    async fn wait(&mut self) -> Result<T, oneshot::error::RecvError> {
        (&mut self.receiver).await
    }
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        self.receiver.close();
        if let Ok(value) = self.receiver.try_recv() {
            self.shared.release(value);
        }
    }
}

/// Scoped ownership of the lock. Released exactly once, on drop or via [`LockGuard::release`].
pub struct LockGuard<T> {
    shared: Arc<Shared<T>>,
    value: Option<T>,
}

impl<T> LockGuard<T> {
    fn new(shared: Arc<Shared<T>>, value: T) -> Self {
        Self {
            shared,
            value: Some(value),
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for LockGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_ref()
            .unwrap_or_else(|| unreachable!("lock value is only taken on drop"))
    }
}

impl<T> DerefMut for LockGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
            .as_mut()
            .unwrap_or_else(|| unreachable!("lock value is only taken on drop"))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LockGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LockGuard").field(&self.value).finish()
    }
}

impl<T> Drop for LockGuard<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.shared.release(value);
        }
    }
}
