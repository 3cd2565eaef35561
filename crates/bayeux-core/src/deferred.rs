//! Deferred status handles.
//!
//! A [`Deferred`] reports the outcome of an asynchronous protocol operation
//! such as a subscribe or a publish. The side performing the operation
//! holds the matching [`Resolver`]. The first resolution wins; later ones
//! are ignored.

use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of a deferred operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredStatus<E> {
    /// Not resolved yet.
    Unknown,
    /// The operation succeeded.
    Succeeded,
    /// The operation failed.
    Failed(E),
}

impl<E> DeferredStatus<E> {
    /// Check whether the status is final.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, DeferredStatus::Unknown)
    }
}

/// Returned by [`Deferred::wait`] when every resolver was dropped unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

/// Resolving side of a deferred operation.
#[derive(Debug)]
pub struct Resolver<E> {
    tx: Arc<watch::Sender<DeferredStatus<E>>>,
}

impl<E> Clone for Resolver<E> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

/// Observing side of a deferred operation.
#[derive(Debug, Clone)]
pub struct Deferred<E> {
    rx: watch::Receiver<DeferredStatus<E>>,
}

/// Create a linked resolver and deferred pair.
#[must_use]
pub fn deferred<E>() -> (Resolver<E>, Deferred<E>) {
    let (tx, rx) = watch::channel(DeferredStatus::Unknown);
    (Resolver { tx: Arc::new(tx) }, Deferred { rx })
}

impl<E> Resolver<E> {
    /// Resolve as succeeded.
    ///
    /// Returns `false` if the deferred was already resolved.
    pub fn succeed(&self) -> bool {
        self.resolve(DeferredStatus::Succeeded)
    }

    /// Resolve as failed.
    ///
    /// Returns `false` if the deferred was already resolved.
    pub fn fail(&self, error: E) -> bool {
        self.resolve(DeferredStatus::Failed(error))
    }

    fn resolve(&self, status: DeferredStatus<E>) -> bool {
        let mut status = Some(status);
        self.tx.send_if_modified(|current| {
            if current.is_resolved() {
                return false;
            }
            if let Some(status) = status.take() {
                *current = status;
            }
            true
        })
    }

    /// Check whether this resolver already fired.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_resolved()
    }
}

impl<E: Clone> Deferred<E> {
    /// Get the current status without waiting.
    #[must_use]
    pub fn status(&self) -> DeferredStatus<E> {
        self.rx.borrow().clone()
    }

    /// Wait for the operation to resolve.
    ///
    /// # Errors
    ///
    /// Returns the failure the operation resolved with, or
    /// `E::from(Abandoned)` if it can no longer be resolved.
    pub async fn wait(&self) -> Result<(), E>
    where
        E: From<Abandoned>,
    {
        let mut rx = self.rx.clone();
        let status = rx
            .wait_for(DeferredStatus::is_resolved)
            .await
            .map_err(|_| E::from(Abandoned))?
            .clone();

        match status {
            DeferredStatus::Failed(error) => Err(error),
            _ => Ok(()),
        }
    }
}
