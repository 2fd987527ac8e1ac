//! Fan-out of tool-side `log` events to subscribers.

use crate::protocol::{LogLevel, LogMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type LogCallback = Arc<dyn Fn(&LogMessage) + Send + Sync>;
type Subscribers = Mutex<Vec<(u64, LogCallback)>>;

/// Registered log subscribers of one sandbox.
///
/// Cloning shares the same subscriber list.
#[derive(Clone, Default)]
pub struct LogSubscribers {
    inner: Arc<Subscribers>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for LogSubscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscribers")
            .field("count", &self.len())
            .finish()
    }
}

impl LogSubscribers {
    /// Register a subscriber.
    pub fn subscribe<F>(&self, callback: F) -> LogSubscription
    where
        F: Fn(&LogMessage) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        LogSubscription {
            id,
            subscribers: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a message to every subscriber.
    ///
    /// The list is copied before iterating, so a callback may subscribe or
    /// unsubscribe without affecting this delivery.
    pub fn dispatch(&self, message: &LogMessage) {
        let snapshot: Vec<LogCallback> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(message);
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`LogSubscribers::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct LogSubscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl LogSubscription {
    /// Remove this subscriber only.
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Forward a tool-side log message to `tracing` under the `nrfutil` target.
pub fn log_to_tracing(message: &LogMessage) {
    let text = message.message.as_str();
    match message.level {
        LogLevel::Off => {}
        LogLevel::Critical | LogLevel::Error => tracing::error!(target: "nrfutil", "{text}"),
        LogLevel::Warn => tracing::warn!(target: "nrfutil", "{text}"),
        LogLevel::Info => tracing::info!(target: "nrfutil", "{text}"),
        LogLevel::Debug => tracing::debug!(target: "nrfutil", "{text}"),
        LogLevel::Trace => tracing::trace!(target: "nrfutil", "{text}"),
    }
}
