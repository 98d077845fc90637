//! Turn scope with deferred finalizers

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use parley_core::CancellationToken;

type Finalizer = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cancellation scope of one turn
///
/// Finalizers registered with [`TurnScope::defer`] run once when the
/// scope is closed, most recently registered first, whatever way the
/// turn ended.
pub struct TurnScope {
    token: CancellationToken,
    finalizers: Mutex<Vec<Finalizer>>,
    closed: AtomicBool,
}

impl TurnScope {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            finalizers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn defer<F>(&self, finalizer: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.finalizers.lock().push(Box::pin(finalizer));
    }

    /// Run the finalizers; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let finalizers = std::mem::take(&mut *self.finalizers.lock());
        for finalizer in finalizers.into_iter().rev() {
            finalizer.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
