//! Relays every input token to the output unchanged.
use futures::future::BoxFuture;

use crate::net::context::Context;
use crate::net::token::Payload;
use crate::process::{Inbox, Outbox, Process};

#[derive(Debug, Clone, Default)]
pub struct Mediator {
    label: Option<String>,
}

impl Mediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints `label` and the token before passing it on.
    pub fn printing(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

impl<P: Payload> Process<P> for Mediator {
    fn run(&self, ctx: Context, mut input: Inbox<P>, output: Outbox<P>) -> BoxFuture<'static, anyhow::Result<()>> {
        let label = self.label.clone();
        Box::pin(async move {
            loop {
                tokio::select! {
                    token = input.recv() => {
                        let Some(token) = token else {
                            return Ok(());
                        };
                        if let Some(label) = &label {
                            println!("{label} {token}");
                        }
                        output.send(token).await?;
                    }
                    _ = ctx.cancelled() => return Ok(()),
                }
            }
        })
    }
}
