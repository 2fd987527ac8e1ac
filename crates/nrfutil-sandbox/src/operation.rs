//! Cancellable handle over one in-flight nrfutil command.

use crate::error::SandboxError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running command that can be cancelled and awaited.
///
/// Awaiting yields the command's result. [`cancel`](Self::cancel) asks the
/// child process to terminate; the operation still settles through the
/// normal close path, so a cancelled command usually resolves to an error.
/// Use [`was_cancelled`](Self::was_cancelled) to tell the two apart.
///
/// Dropping the handle detaches the command: it keeps running to completion
/// and any [`map`](Self::map) step still executes.
#[derive(Debug)]
pub struct Operation<T, E = SandboxError> {
    cancel: CancellationToken,
    handle: JoinHandle<Result<T, E>>,
}

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: From<SandboxError> + Send + 'static,
{
    /// Run `future` as an operation controlled by `cancel`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<F>(cancel: CancellationToken, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            cancel,
            handle: tokio::spawn(future),
        }
    }

    /// An operation that has already settled with `result`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn ready(result: Result<T, E>) -> Self {
        Self::spawn(CancellationToken::new(), async move { result })
    }

    /// Chain a step that runs on every completion path, including failure
    /// and cancellation.
    ///
    /// The returned operation shares this one's cancellation token.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn map<U, E2, F>(self, f: F) -> Operation<U, E2>
    where
        U: Send + 'static,
        E2: From<SandboxError> + Send + 'static,
        F: FnOnce(Result<T, E>) -> Result<U, E2> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        Operation::spawn(cancel, async move { f(self.await) })
    }
}

impl<T, E> Operation<T, E> {
    /// Request termination of the child process.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn was_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this operation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the operation has settled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T, E> Future for Operation<T, E>
where
    E: From<SandboxError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(SandboxError::TaskFailed(e.to_string()).into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn waiting(cancel: CancellationToken) -> Operation<u32> {
        let token = cancel.clone();
        Operation::spawn(cancel, async move {
            token.cancelled().await;
            Err(SandboxError::CommandFailed {
                exit_code: None,
                message: "terminated".into(),
            })
        })
    }

    #[test]
    #[should_panic]
    fn test_requires_runtime() {
        let _ = Operation::<u32>::ready(Ok(1));
    }

    #[tokio::test]
    async fn test_resolves_value() {
        let op: Operation<u32> = Operation::spawn(CancellationToken::new(), async { Ok(7) });
        assert_eq!(op.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_settles_through_close_path() {
        let op = waiting(CancellationToken::new());
        assert!(!op.was_cancelled());

        op.cancel();
        assert!(op.was_cancelled());

        let err = op.await.unwrap_err();
        assert_eq!(err.exit_code(), None);
        assert!(err.to_string().contains("terminated"));
    }

    #[tokio::test]
    async fn test_map_runs_on_failure_and_shares_token() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let op = waiting(CancellationToken::new()).map(move |result| {
            flag.store(true, Ordering::SeqCst);
            result.map(|n| n * 2)
        });

        op.cancel();
        assert!(op.await.is_err());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_map_runs_when_dropped() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let cancel = CancellationToken::new();

        let op = waiting(cancel.clone()).map(move |result| {
            flag.store(true, Ordering::SeqCst);
            result
        });
        drop(op);
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !ran.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("map step should run after the handle is dropped");
    }

    #[tokio::test]
    async fn test_panic_becomes_task_failed() {
        let op: Operation<u32> = Operation::spawn(CancellationToken::new(), async {
            if true {
                panic!("boom");
            }
            Ok(0)
        });
        assert!(matches!(op.await, Err(SandboxError::TaskFailed(_))));
    }
}
