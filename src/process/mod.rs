//! Process functions bound to places, plus the stock ones used to seed, relay and drain tokens.
use std::future::Future;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, OwnedMutexGuard};

use crate::net::context::Context;
use crate::net::token::{Payload, Token};

pub mod annihilator;
pub mod collector;
pub mod generator;
pub mod mediator;

pub use annihilator::Annihilator;
pub use collector::Collector;
pub use generator::Generator;
pub use mediator::Mediator;

/// Work attached to a place: consumes its input, produces its output.
///
/// Any `Fn(Context, Inbox<P>, Outbox<P>) -> impl Future<Output = anyhow::Result<()>>`
/// is a process. The future is dropped when the run is cancelled, so a process
/// only needs to watch `ctx` if it has cleanup to do before returning.
pub trait Process<P: Payload>: Send + Sync + 'static {
    fn run(&self, ctx: Context, input: Inbox<P>, output: Outbox<P>) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<P, F, Fut> Process<P> for F
where
    P: Payload,
    F: Fn(Context, Inbox<P>, Outbox<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn run(&self, ctx: Context, input: Inbox<P>, output: Outbox<P>) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(ctx, input, output))
    }
}

/// Exclusive view of a place's input for the duration of a run.
pub struct Inbox<P> {
    rx: OwnedMutexGuard<mpsc::Receiver<Token<P>>>,
}

impl<P: Payload> Inbox<P> {
    pub(crate) fn new(rx: OwnedMutexGuard<mpsc::Receiver<Token<P>>>) -> Self {
        Self { rx }
    }

    /// Next token offered to or relayed into the place.
    pub async fn recv(&mut self) -> Option<Token<P>> {
        self.rx.recv().await
    }
}

#[derive(Debug, Error)]
#[error("place output is closed")]
pub struct OutboxClosed;

/// Producing side of a place; tokens sent here are handed to outbound transitions.
pub struct Outbox<P> {
    tx: mpsc::Sender<Token<P>>,
}

impl<P> Clone for Outbox<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P: Payload> Outbox<P> {
    pub(crate) fn new(tx: mpsc::Sender<Token<P>>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, token: Token<P>) -> Result<(), OutboxClosed> {
        self.tx.send(token).await.map_err(|_| OutboxClosed)
    }
}
