//! 库所：绑定处理函数，并在其私有输入/输出与各迁移的同步结构之间转发令牌。
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};

use crate::net::context::Context;
use crate::net::fabric::{Fabric, FabricError};
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::stats::{Counters, Stats};
use crate::net::token::{Payload, Token};
use crate::process::{Inbox, Outbox, Process};

#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("process function failed: {source}")]
    Process {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("fabric of transition {transition} closed while the place was live")]
    FabricClosed { transition: TransitionId },
    #[error(transparent)]
    Fabric(#[from] FabricError),
    #[error("place input is not initialized")]
    NotInitialized,
    #[error("relay task panicked: {0}")]
    Panicked(String),
}

/// State shared between a place's owner and the tasks of a run.
pub(crate) struct PlaceCore<P> {
    id: PlaceId,
    process: Box<dyn Process<P>>,
    input_tx: mpsc::Sender<Token<P>>,
    input_rx: Arc<Mutex<mpsc::Receiver<Token<P>>>>,
    output_buffer: usize,
    counters: Counters,
}

impl<P: Payload> PlaceCore<P> {
    /// Injects `token` straight into the place's input.
    pub(crate) async fn offer(&self, token: Token<P>) -> Result<(), PlaceError> {
        self.input_tx
            .send(token)
            .await
            .map_err(|_| PlaceError::NotInitialized)
    }
}

pub struct Place<P> {
    core: Arc<PlaceCore<P>>,
    inbound: Vec<TransitionId>,
    outbound: Vec<TransitionId>,
}

impl<P: Payload> Place<P> {
    pub(crate) fn new(id: PlaceId, process: Box<dyn Process<P>>, buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (input_tx, input_rx) = mpsc::channel(buffer);
        Self {
            core: Arc::new(PlaceCore {
                id,
                process,
                input_tx,
                input_rx: Arc::new(Mutex::new(input_rx)),
                output_buffer: buffer,
                counters: Counters::default(),
            }),
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn id(&self) -> &PlaceId {
        &self.core.id
    }

    pub fn inbound(&self) -> &[TransitionId] {
        &self.inbound
    }

    pub fn outbound(&self) -> &[TransitionId] {
        &self.outbound
    }

    pub(crate) fn attach_inbound(&mut self, transition: TransitionId) {
        self.inbound.push(transition);
    }

    pub(crate) fn attach_outbound(&mut self, transition: TransitionId) {
        self.outbound.push(transition);
    }

    pub fn stats(&self) -> Stats {
        self.core.counters.snapshot()
    }

    pub(crate) fn handle(&self) -> Arc<PlaceCore<P>> {
        Arc::clone(&self.core)
    }

    /// Binds the place to the fabrics of one run.
    pub(crate) fn runner(&self, fabrics: &HashMap<TransitionId, Arc<Fabric<P>>>) -> PlaceRunner<P> {
        let wire = |ids: &[TransitionId]| {
            ids.iter()
                .filter_map(|id| fabrics.get(id).cloned())
                .collect::<Vec<_>>()
        };
        PlaceRunner {
            core: self.handle(),
            inbound: wire(&self.inbound),
            outbound: wire(&self.outbound),
        }
    }
}

impl<P> fmt::Debug for Place<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Place")
            .field("id", &self.core.id)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}

pub(crate) struct PlaceRunner<P> {
    core: Arc<PlaceCore<P>>,
    inbound: Vec<Arc<Fabric<P>>>,
    outbound: Vec<Arc<Fabric<P>>>,
}

impl<P: Payload> PlaceRunner<P> {
    pub(crate) fn id(&self) -> &PlaceId {
        &self.core.id
    }

    /// Runs the process function, one relay per inbound transition and one
    /// dispatcher feeding all outbound transitions.
    ///
    /// Returns once the process function returned and everything it produced
    /// was handed over, once `ctx` is cancelled, or on the first failure.
    /// Relay tasks are stopped and inbound fabrics stop delivering here
    /// before returning.
    pub(crate) async fn run(self, ctx: Context) -> Result<(), PlaceError> {
        let PlaceRunner {
            core,
            inbound,
            outbound,
        } = self;

        let input = tokio::select! {
            guard = Arc::clone(&core.input_rx).lock_owned() => guard,
            _ = ctx.cancelled() => return Ok(()),
        };
        let (output_tx, output_rx) = mpsc::channel(core.output_buffer);

        let mut inbound_relays = JoinSet::new();
        for fabric in &inbound {
            inbound_relays.spawn(inbound_relay(Arc::clone(&core), Arc::clone(fabric)));
        }
        let mut outbound_relays = JoinSet::new();
        // Without outbound transitions the output stays open but is never drained.
        let _unrouted = if outbound.is_empty() {
            Some(output_rx)
        } else {
            outbound_relays.spawn(outbound_relay(Arc::clone(&core), outbound, output_rx));
            None
        };
        log::debug!(
            "place {} running with {} inbound relays",
            core.id,
            inbound_relays.len()
        );

        let mut process = core
            .process
            .run(ctx.clone(), Inbox::new(input), Outbox::new(output_tx));
        let mut process_done = false;
        let outcome = loop {
            tokio::select! {
                _ = ctx.cancelled() => break Ok(()),
                result = &mut process, if !process_done => match result {
                    Ok(()) => {
                        log::debug!("place {}: process function returned", core.id);
                        process_done = true;
                        if outbound_relays.is_empty() {
                            break Ok(());
                        }
                    }
                    Err(err) => break Err(PlaceError::Process { source: err.into() }),
                },
                Some(joined) = inbound_relays.join_next() => {
                    if let Err(err) = flatten(joined) {
                        break Err(err);
                    }
                }
                Some(joined) = outbound_relays.join_next() => match flatten(joined) {
                    Err(err) => break Err(err),
                    Ok(()) if process_done && outbound_relays.is_empty() => break Ok(()),
                    Ok(()) => {}
                },
            }
        };

        inbound_relays.shutdown().await;
        outbound_relays.shutdown().await;
        for fabric in &inbound {
            if let Err(err) = fabric.close_receiver(&core.id).await {
                log::warn!("place {}: {}", core.id, err);
            }
        }
        outcome
    }
}

fn flatten(joined: Result<Result<(), PlaceError>, JoinError>) -> Result<(), PlaceError> {
    joined.map_err(|err| PlaceError::Panicked(err.to_string()))?
}

async fn inbound_relay<P: Payload>(core: Arc<PlaceCore<P>>, fabric: Arc<Fabric<P>>) -> Result<(), PlaceError> {
    loop {
        let Some(token) = fabric.recv(&core.id).await? else {
            return Err(PlaceError::FabricClosed {
                transition: fabric.transition().clone(),
            });
        };
        let token = token.with_checkpoint(fabric.transition().clone(), Utc::now());
        core.counters.accepted();
        core.offer(token).await?;
        core.counters.processing();
    }
}

/// Hands every produced token to one ready outbound transition.
///
/// Ready transitions are polled starting after the one served last, so a
/// transition that is ready again right away still lets the others go first.
async fn outbound_relay<P: Payload>(
    core: Arc<PlaceCore<P>>,
    fabrics: Vec<Arc<Fabric<P>>>,
    mut output: mpsc::Receiver<Token<P>>,
) -> Result<(), PlaceError> {
    let signals = fabrics
        .iter()
        .map(|fabric| fabric.ready_send(&core.id))
        .collect::<Result<Vec<_>, _>>()?;
    let mut next = 0;
    while let Some(token) = output.recv().await {
        let mut waits: Vec<_> = signals
            .iter()
            .enumerate()
            .map(|(idx, signals)| Box::pin(async move { (idx, signals.next().await) }))
            .collect();
        waits.rotate_left(next);
        let ((chosen, permit), _, _) = futures::future::select_all(waits).await;
        next = (chosen + 1) % signals.len();
        log::trace!("place {}: token goes to {}", core.id, permit.transition());
        permit.send(token).await?;
        core.counters.sent();
    }
    log::debug!("place {}: output drained", core.id);
    Ok(())
}
