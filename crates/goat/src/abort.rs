//! Cancellation token with a settable reason.

use tokio::sync::watch;

use crate::error::GoatError;

pub(crate) const ABORT_MESSAGE: &str = "This operation was aborted";

/// Create a connected abort handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(None);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// Owner side of an abort signal.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<Option<GoatError>>,
}

impl AbortHandle {
    /// Fire the signal with the default reason.
    pub fn abort(&self) {
        self.abort_with(GoatError::Aborted(ABORT_MESSAGE.into()));
    }

    /// Fire the signal with an explicit reason. The first reason wins.
    pub fn abort_with(&self, reason: GoatError) {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

/// Observer side of an abort signal. Cloneable; polled by call drivers.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<GoatError>>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The abort reason, once set.
    pub fn reason(&self) -> Option<GoatError> {
        self.rx.borrow().clone()
    }

    /// Resolve with the abort reason once the signal fires. Pends forever if
    /// the handle is dropped without firing.
    pub async fn aborted(&self) -> GoatError {
        let mut rx = self.rx.clone();
        let resolved = {
            let result = rx.wait_for(|slot| slot.is_some()).await;
            match result {
                Ok(slot) => slot.clone(),
                Err(_) => None,
            }
        };
        match resolved {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_reason() {
        let (handle, signal) = abort_pair();
        assert!(!signal.is_aborted());
        handle.abort();
        assert!(signal.is_aborted());
        let reason = signal.reason().unwrap();
        assert_eq!(reason.to_string(), format!("aborted: {ABORT_MESSAGE}"));
    }

    #[tokio::test]
    async fn first_reason_wins() {
        let (handle, signal) = abort_pair();
        handle.abort_with(GoatError::DeadlineExceeded);
        handle.abort();
        assert!(matches!(signal.reason(), Some(GoatError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn aborted_resolves_on_fire() {
        let (handle, signal) = abort_pair();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::task::yield_now().await;
        handle.abort_with(GoatError::Aborted("later".into()));
        let reason = waiter.await.unwrap();
        assert_eq!(reason.to_string(), "aborted: later");
    }
}
