//! Graceful shutdown coordinator.
//!
//! Handlers register with a name and a priority; on shutdown they run in
//! ascending priority order. A handler error is recorded but does not stop
//! the sequence. The coordinator runs at most once — a second call reports
//! failure immediately.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::error::Result;

type ShutdownFn = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Handler {
    name: String,
    priority: i32,
    run: ShutdownFn,
}

/// Runs registered handlers once, in ascending priority order.
pub struct GracefulShutdown {
    handlers: Mutex<Vec<Handler>>,
    shutting_down: AtomicBool,
    complete: AtomicBool,
}

impl GracefulShutdown {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            complete: AtomicBool::new(false),
        }
    }

    /// Register a shutdown handler.
    ///
    /// Lower priorities run first.
    pub fn register<F>(&self, name: impl Into<String>, priority: i32, handler: F)
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("shutdown lock poisoned")
            .push(Handler {
                name: name.into(),
                priority,
                run: Box::new(handler),
            });
    }

    /// Run every handler in ascending priority order.
    ///
    /// Returns `true` iff no handler errored. A second call returns
    /// `false` without running anything.
    pub async fn shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("shutdown already in progress");
            return false;
        }

        let mut handlers = {
            let mut guard = self.handlers.lock().expect("shutdown lock poisoned");
            std::mem::take(&mut *guard)
        };
        handlers.sort_by_key(|h| h.priority);

        let mut clean = true;
        for handler in &handlers {
            info!(handler = %handler.name, priority = handler.priority, "running shutdown handler");
            if let Err(err) = (handler.run)().await {
                warn!(handler = %handler.name, error = %err, "shutdown handler failed");
                clean = false;
            }
        }

        self.complete.store(true, Ordering::SeqCst);
        clean
    }

    /// `true` once [`GracefulShutdown::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// `true` once the shutdown sequence has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GracefulShutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulShutdown")
            .field("handlers", &self.handlers.lock().expect("lock").len())
            .field("shutting_down", &self.is_shutting_down())
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_handlers_run_in_priority_order() {
        let shutdown = GracefulShutdown::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("last", 10), ("first", 1), ("middle", 5)] {
            let order = Arc::clone(&order);
            shutdown.register(name, priority, move || {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().expect("lock").push(name);
                    Ok(())
                })
            });
        }

        assert!(shutdown.shutdown().await);
        assert_eq!(
            *order.lock().expect("lock"),
            vec!["first", "middle", "last"]
        );
        assert!(shutdown.is_complete());
    }

    #[tokio::test]
    async fn test_handler_error_noted_but_sequence_continues() {
        let shutdown = GracefulShutdown::new();
        let ran_after = Arc::new(AtomicBool::new(false));

        shutdown.register("boom", 1, || {
            Box::pin(async { Err(Error::internal("handler failed")) })
        });
        let ran = Arc::clone(&ran_after);
        shutdown.register("after", 2, move || {
            let ran = Arc::clone(&ran);
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        assert!(!shutdown.shutdown().await);
        assert!(ran_after.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_second_shutdown_returns_false() {
        let shutdown = GracefulShutdown::new();
        assert!(shutdown.shutdown().await);
        assert!(!shutdown.shutdown().await);
        assert!(shutdown.is_shutting_down());
    }
}
