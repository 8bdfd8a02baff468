//! Seeds tokens into the net: emits every produced value once, then returns.
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::net::context::Context;
use crate::net::token::{Payload, Token};
use crate::process::{Inbox, Outbox, Process};

type Source<P> = dyn Fn() -> Box<dyn Iterator<Item = P> + Send> + Send + Sync;

pub struct Generator<P> {
    source: Arc<Source<P>>,
}

impl<P: Payload> Generator<P> {
    /// One token per `idx` in `from..to` advancing by `step`; `build` makes the payload.
    pub fn range<F>(from: i64, to: i64, step: i64, build: F) -> Self
    where
        F: Fn(i64) -> P + Send + Sync + 'static,
    {
        let step = usize::try_from(step).unwrap_or(1).max(1);
        let build = Arc::new(build);
        Self {
            source: Arc::new(move || -> Box<dyn Iterator<Item = P> + Send> {
                let build = Arc::clone(&build);
                Box::new((from..to).step_by(step).map(move |idx| build(idx)))
            }),
        }
    }

    /// Emits the given payloads in order, once per run.
    pub fn values(values: impl IntoIterator<Item = P>) -> Self {
        let values: Vec<P> = values.into_iter().collect();
        Self {
            source: Arc::new(move || -> Box<dyn Iterator<Item = P> + Send> {
                Box::new(values.clone().into_iter())
            }),
        }
    }
}

impl<P> fmt::Debug for Generator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator").finish_non_exhaustive()
    }
}

impl<P: Payload> Process<P> for Generator<P> {
    fn run(&self, _ctx: Context, _input: Inbox<P>, output: Outbox<P>) -> BoxFuture<'static, anyhow::Result<()>> {
        let values = (self.source)();
        Box::pin(async move {
            for value in values {
                output.send(Token::new(value)).await?;
            }
            Ok(())
        })
    }
}
