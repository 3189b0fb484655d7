use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

struct Shared {
    state: AtomicBool,
    notify: Notify,
}

/// A one-shot async flag, shared between the worker loop, its heartbeat
/// ticker and its stalled-task recoverer so all three observe shutdown at
/// the same suspension points.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<Shared>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(Shared {
            state: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn raise(&self) {
        self.0.state.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.0.state.load(Ordering::Acquire)
    }

    pub fn wait(&self) -> ShutdownFuture {
        // Early check since there is no reason to create a Notified if it is not
        // necessary.
        //
        // We still need to check after creating the notified to avoid the case where
        // raise is called between when we checked the flag and when we constructed the
        // Notified.
        if self.is_raised() {
            return ShutdownFuture(None);
        }

        let notified = self.0.notify.notified();

        if self.is_raised() {
            ShutdownFuture(None)
        } else {
            ShutdownFuture(Some(notified))
        }
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownFuture<'a>(Option<Notified<'a>>);

impl Future for ShutdownFuture<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: project Pin<&mut Self> -> Option<Pin<&mut Notified>>
        let notified = unsafe {
            let this = Pin::get_unchecked_mut(self);
            this.0.as_mut().map(|v| Pin::new_unchecked(v))
        };

        match notified {
            Some(notified) => notified.poll(cx),
            None => Poll::Ready(()),
        }
    }
}

/// Raises the flag when dropped, so a panicking or early-returning task
/// never leaves its siblings waiting forever.
pub struct ShutdownGuard<'a>(&'a ShutdownFlag);

impl<'a> ShutdownGuard<'a> {
    pub fn new(flag: &'a ShutdownFlag) -> Self {
        Self(flag)
    }
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        if !self.0.is_raised() {
            tracing::warn!("worker task shutting down without the shutdown flag being raised");
        }

        self.0.raise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_immediately_once_raised() {
        let flag = ShutdownFlag::new();
        flag.raise();
        flag.wait().await;
    }

    #[tokio::test]
    async fn wait_resolves_after_raise_is_called() {
        let flag = ShutdownFlag::new();
        let waiter = flag.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        tokio::task::yield_now().await;
        flag.raise();
        handle.await.unwrap();
    }
}
