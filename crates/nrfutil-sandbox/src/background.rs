//! Long-running nrfutil commands such as hotplug enumeration.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type ClosedHandler = Box<dyn FnOnce(Option<i32>) + Send>;

#[derive(Default)]
struct CloseState {
    // `Some(exit_code)` once the process has closed.
    exit: Option<Option<i32>>,
    handlers: Vec<(u64, ClosedHandler)>,
    next_id: u64,
}

/// Close notification shared between a [`BackgroundTask`] and its driver.
pub(crate) struct CloseNotifier {
    state: Arc<Mutex<CloseState>>,
    tx: watch::Sender<Option<Option<i32>>>,
}

impl CloseNotifier {
    /// Record the exit and notify every registered handler once.
    pub fn close(self, exit_code: Option<i32>) {
        self.notify(exit_code);
    }

    fn notify(&self, exit_code: Option<i32>) {
        let handlers = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.exit.is_some() {
                return;
            }
            state.exit = Some(exit_code);
            std::mem::take(&mut state.handlers)
        };

        for (_, handler) in handlers {
            handler(exit_code);
        }
        self.tx.send_replace(Some(exit_code));
    }
}

// A driver that panics still closes the task.
impl Drop for CloseNotifier {
    fn drop(&mut self) {
        self.notify(None);
    }
}

/// Control handle of a background command.
///
/// Data and errors are delivered through the callbacks given when the
/// command was spawned. The handle itself only controls and observes the
/// process lifetime. Dropping it does not stop the process.
pub struct BackgroundTask {
    cancel: CancellationToken,
    state: Arc<Mutex<CloseState>>,
    rx: watch::Receiver<Option<Option<i32>>>,
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("running", &self.is_running())
            .field("stopping", &self.cancel.is_cancelled())
            .finish()
    }
}

impl BackgroundTask {
    pub(crate) fn new(cancel: CancellationToken) -> (Self, CloseNotifier) {
        let state = Arc::new(Mutex::new(CloseState::default()));
        let (tx, rx) = watch::channel(None);
        let task = Self {
            cancel,
            state: Arc::clone(&state),
            rx,
        };
        (task, CloseNotifier { state, tx })
    }

    /// Ask the process to terminate.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Ask the process to terminate and call `handler` once it has closed.
    pub fn stop_with<F>(&self, handler: F)
    where
        F: FnOnce(Option<i32>) + Send + 'static,
    {
        // Subscription is dropped on purpose: the handler stays registered.
        let _ = self.on_closed(handler);
        self.stop();
    }

    /// True until the process has closed.
    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .exit
            .is_none()
    }

    /// Call `handler` with the exit code when the process closes.
    ///
    /// Each handler runs at most once. If the process has already closed,
    /// `handler` runs immediately.
    pub fn on_closed<F>(&self, handler: F) -> ClosedSubscription
    where
        F: FnOnce(Option<i32>) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(exit_code) = state.exit {
            drop(state);
            handler(exit_code);
            return ClosedSubscription {
                id: None,
                state: Weak::new(),
            };
        }

        let id = state.next_id;
        state.next_id += 1;
        state.handlers.push((id, Box::new(handler)));

        ClosedSubscription {
            id: Some(id),
            state: Arc::downgrade(&self.state),
        }
    }

    /// Wait until the process has closed and return its exit code.
    ///
    /// `None` means the process was terminated by a signal or never started.
    pub async fn closed(&self) -> Option<i32> {
        let mut rx = self.rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).flatten(),
            Err(_) => None,
        };
        exit
    }
}

/// Registration of an [`on_closed`](BackgroundTask::on_closed) handler.
#[derive(Debug)]
pub struct ClosedSubscription {
    id: Option<u64>,
    state: Weak<Mutex<CloseState>>,
}

impl ClosedSubscription {
    /// Remove this handler; other handlers are unaffected.
    pub fn unsubscribe(self) {
        let (Some(id), Some(state)) = (self.id, self.state.upgrade()) else {
            return;
        };
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .retain(|(handler_id, _)| *handler_id != id);
    }
}
