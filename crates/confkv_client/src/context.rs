//! Call context: cancellation, deadline, and the active transaction.
//!
//! A [`Context`] is passed explicitly to every key-value call. Cloning is
//! cheap; derived contexts share the parent's cancellation token.

use crate::error::{TxnError, TxnResult};
use crate::txn::Txn;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// A cloneable cancellation signal.
///
/// All clones observe the same state. Once cancelled, a token stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Creates a new, not yet cancelled token.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Cancels every context holding this token.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Completes when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Context threaded through every key-value call.
///
/// Carries:
/// - a [`CancellationToken`] that aborts in-flight store calls and pending
///   retries,
/// - an optional deadline,
/// - the transaction handle of the surrounding
///   [`do_in_transaction`](crate::Client::do_in_transaction), if any.
#[derive(Debug, Clone, Default)]
pub struct Context {
    txn: Option<Txn>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Creates a root context with no deadline and no transaction.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a copy of this context carrying `txn`.
    #[must_use]
    pub fn with_transaction(&self, txn: Txn) -> Self {
        Self {
            txn: Some(txn),
            ..self.clone()
        }
    }

    /// Returns a copy of this context without a transaction.
    #[must_use]
    pub fn without_transaction(&self) -> Self {
        Self {
            txn: None,
            ..self.clone()
        }
    }

    /// Returns the transaction carried by this context.
    pub fn transaction(&self) -> Option<&Txn> {
        self.txn.as_ref()
    }

    /// Returns a copy of this context using `token` for cancellation.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    /// Returns a copy of this context that expires after `timeout`.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a copy of this context that expires at `deadline`.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Returns the cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the error this context would fail with right now, if any.
    pub fn err(&self) -> Option<TxnError> {
        if self.cancel.is_cancelled() {
            return Some(TxnError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(TxnError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Runs `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever comes first.
    pub async fn bound<F, T, E>(&self, fut: F) -> TxnResult<T>
    where
        F: Future<Output = Result<T, E>>,
        TxnError: From<E>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TxnError::Cancelled),
            _ = expired => Err(TxnError::DeadlineExceeded),
            result = fut => result.map_err(TxnError::from),
        }
    }

    /// Sleeps for `duration`, returning early with an error if the context
    /// ends first.
    pub async fn sleep(&self, duration: Duration) -> TxnResult<()> {
        if duration.is_zero() {
            return self.err().map_or(Ok(()), Err);
        }
        self.bound(async {
            tokio::time::sleep(duration).await;
            Ok::<(), TxnError>(())
        })
        .await
    }
}
