//! Sink that keeps what it consumes so callers can inspect it afterwards.
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::net::context::Context;
use crate::net::token::{Payload, Token};
use crate::process::{Inbox, Outbox, Process};

/// Clones share one buffer: keep a clone, hand the other to the net.
#[derive(Debug)]
pub struct Collector<P> {
    tokens: Arc<Mutex<Vec<Token<P>>>>,
    limit: Option<usize>,
}

impl<P> Clone for Collector<P> {
    fn clone(&self) -> Self {
        Self {
            tokens: Arc::clone(&self.tokens),
            limit: self.limit,
        }
    }
}

impl<P: Payload> Collector<P> {
    /// Collects until the run is cancelled.
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(Mutex::new(Vec::new())),
            limit: None,
        }
    }

    /// Returns from its run once `limit` tokens arrived in that run.
    pub fn take(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    pub fn tokens(&self) -> Vec<Token<P>> {
        self.tokens.lock().clone()
    }

    pub fn payloads(&self) -> Vec<P> {
        self.tokens
            .lock()
            .iter()
            .map(|token| token.payload().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: Payload> Default for Collector<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> Process<P> for Collector<P> {
    fn run(&self, ctx: Context, mut input: Inbox<P>, _output: Outbox<P>) -> BoxFuture<'static, anyhow::Result<()>> {
        let tokens = Arc::clone(&self.tokens);
        let limit = self.limit;
        Box::pin(async move {
            let mut received = 0usize;
            while limit.is_none_or(|limit| received < limit) {
                tokio::select! {
                    token = input.recv() => {
                        let Some(token) = token else {
                            break;
                        };
                        tokens.lock().push(token);
                        received += 1;
                    }
                    _ = ctx.cancelled() => break,
                }
            }
            Ok(())
        })
    }
}
