//! Cancellation scope handed to every place and process function of a run.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: watch::Sender<bool>,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

impl Context {
    /// A root context that is only cancelled explicitly.
    pub fn background() -> Self {
        Self::build(None, None)
    }

    /// A context cancelled together with `self`, or on its own `cancel`.
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), None)
    }

    /// A child that cancels itself once `timeout` elapses.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Some(self.clone()), Some(Instant::now() + timeout))
    }

    fn build(parent: Option<Context>, deadline: Option<Instant>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancelled,
                deadline,
                parent,
            }),
        }
    }

    /// Whether `self` and `other` are clones of the same scope.
    pub(crate) fn same_scope(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled.borrow() {
            return true;
        }
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(Context::is_cancelled)
    }

    /// Resolves once this context or any ancestor is cancelled or past its deadline.
    pub async fn cancelled(&self) {
        let mut waits = Vec::new();
        let mut deadline: Option<Instant> = None;
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            let mut rx = ctx.inner.cancelled.subscribe();
            waits.push(Box::pin(async move {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            }));
            if let Some(own) = ctx.inner.deadline {
                deadline = Some(deadline.map_or(own, |current| current.min(own)));
            }
            scope = ctx.inner.parent.as_ref();
        }

        let any = futures::future::select_all(waits);
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = any => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => {
                any.await;
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
