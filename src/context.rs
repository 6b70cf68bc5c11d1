use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::HttpError;

/// Cancellation and deadline carried by a logical call.
///
/// Clones share the same cancellation state, so a clone handed to another
/// task can cancel every in-flight use of the context.
#[derive(Clone)]
pub struct CallContext {
    cancel: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel: Arc::new(cancel),
            deadline: None,
        }
    }

    /// Returns a context sharing this one's cancellation with the given deadline.
    ///
    /// An earlier deadline already present on the context is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            cancel: Arc::clone(&self.cancel),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Returns the error explaining why the context is done, if it is.
    pub fn err(&self) -> Option<HttpError> {
        if self.is_cancelled() {
            return Some(HttpError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(HttpError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> HttpError {
        let mut watcher = self.cancel.subscribe();
        let cancelled = async move {
            while !*watcher.borrow_and_update() {
                if watcher.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = cancelled => HttpError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => HttpError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                HttpError::Cancelled
            }
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
