//! Drains tokens out of the net; never produces.
use futures::future::BoxFuture;

use crate::net::context::Context;
use crate::net::token::Payload;
use crate::process::{Inbox, Outbox, Process};

#[derive(Debug, Clone, Default)]
pub struct Annihilator {
    label: Option<String>,
}

impl Annihilator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints `label` and every consumed token.
    pub fn printing(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

impl<P: Payload> Process<P> for Annihilator {
    fn run(&self, ctx: Context, mut input: Inbox<P>, _output: Outbox<P>) -> BoxFuture<'static, anyhow::Result<()>> {
        let label = self.label.clone();
        Box::pin(async move {
            loop {
                tokio::select! {
                    token = input.recv() => {
                        let Some(token) = token else {
                            return Ok(());
                        };
                        match &label {
                            Some(label) => println!("{label} {token}"),
                            None => log::trace!("annihilated {token}"),
                        }
                    }
                    _ = ctx.cancelled() => return Ok(()),
                }
            }
        })
    }
}
