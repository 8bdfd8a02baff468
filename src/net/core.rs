//! 运行时网：拓扑注册、构建期校验、生命周期（Inactive/Active）与并发执行。
use std::fmt::{self, Write as FmtWrite};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::RuntimeConfig;
use crate::net::context::Context;
use crate::net::fabric;
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::place::{Place, PlaceError};
use crate::net::stats::NetStats;
use crate::net::token::{Payload, Token};
use crate::net::transition::Transition;
use crate::process::Process;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("net is active")]
    Active,
    #[error("net is inactive")]
    Inactive,
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("place {0} not found")]
    NotFound(PlaceId),
    #[error("place {place} is listed twice on one side of transition {transition}")]
    DuplicateArc {
        transition: TransitionId,
        place: PlaceId,
    },
    #[error("transition {transition} joins {senders} places but the payload type can't merge")]
    NotMergeable {
        transition: TransitionId,
        senders: usize,
    },
    #[error("place {0} can't accept tokens")]
    NotInitialized(PlaceId),
    #[error("place {place} failed: {source}")]
    Place {
        place: PlaceId,
        #[source]
        source: PlaceError,
    },
    #[error("place task panicked: {0}")]
    Panicked(String),
}

/// Lifecycle of a net. The run scope only exists while active.
#[derive(Debug, Clone, Default)]
pub enum NetState {
    #[default]
    Inactive,
    Active(Context),
}

impl NetState {
    pub fn is_active(&self) -> bool {
        matches!(self, NetState::Active(_))
    }
}

impl fmt::Display for NetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetState::Inactive => f.write_str("inactive"),
            NetState::Active(_) => f.write_str("active"),
        }
    }
}

struct Topology<P> {
    state: NetState,
    places: IndexMap<PlaceId, Place<P>>,
    transitions: IndexMap<TransitionId, Transition>,
}

/// A colored Petri net: places running process functions, wired by transitions.
pub struct Net<P> {
    id: String,
    config: RuntimeConfig,
    topology: RwLock<Topology<P>>,
}

impl<P: Payload> Net<P> {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, RuntimeConfig::default())
    }

    pub fn with_config(id: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            id: id.into(),
            config: config.normalized(),
            topology: RwLock::new(Topology {
                state: NetState::Inactive,
                places: IndexMap::new(),
                transitions: IndexMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> NetState {
        self.topology.read().state.clone()
    }

    pub fn place_ids(&self) -> Vec<PlaceId> {
        self.topology.read().places.keys().cloned().collect()
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.topology.read().transitions.values().cloned().collect()
    }

    pub fn add_place(
        &self,
        id: impl Into<PlaceId>,
        process: impl Process<P>,
    ) -> Result<(), NetError> {
        let id = id.into();
        let mut topology = self.topology.write();
        if topology.state.is_active() {
            return Err(NetError::Active);
        }
        if topology.places.contains_key(&id) {
            return Err(NetError::AlreadyExists {
                kind: "place",
                id: id.to_string(),
            });
        }
        log::debug!("net {}: add place {}", self.id, id);
        let place = Place::new(id.clone(), Box::new(process), self.config.place_buffer);
        topology.places.insert(id, place);
        Ok(())
    }

    /// Declares a transition joining `from` and splitting into `to`.
    ///
    /// Validation happens before anything is attached, so a failed call
    /// leaves the topology untouched.
    pub fn add_transition<F, T>(
        &self,
        id: impl Into<TransitionId>,
        from: F,
        to: T,
    ) -> Result<(), NetError>
    where
        F: IntoIterator,
        F::Item: Into<PlaceId>,
        T: IntoIterator,
        T::Item: Into<PlaceId>,
    {
        let id = id.into();
        let from: Vec<PlaceId> = from.into_iter().map(Into::into).collect();
        let to: Vec<PlaceId> = to.into_iter().map(Into::into).collect();

        let mut topology = self.topology.write();
        if topology.state.is_active() {
            return Err(NetError::Active);
        }
        if topology.transitions.contains_key(&id) {
            return Err(NetError::AlreadyExists {
                kind: "transition",
                id: id.to_string(),
            });
        }
        if let Some(missing) = from
            .iter()
            .chain(&to)
            .find(|place| !topology.places.contains_key(*place))
        {
            return Err(NetError::NotFound(missing.clone()));
        }
        for side in [&from, &to] {
            if let Some(place) = first_duplicate(side) {
                return Err(NetError::DuplicateArc {
                    transition: id,
                    place: place.clone(),
                });
            }
        }
        if from.len() > 1 && !P::MERGEABLE {
            return Err(NetError::NotMergeable {
                transition: id,
                senders: from.len(),
            });
        }

        for place in &from {
            if let Some(place) = topology.places.get_mut(place) {
                place.attach_outbound(id.clone());
            }
        }
        for place in &to {
            if let Some(place) = topology.places.get_mut(place) {
                place.attach_inbound(id.clone());
            }
        }
        log::debug!("net {}: add transition {} {:?} -> {:?}", self.id, id, from, to);
        topology
            .transitions
            .insert(id.clone(), Transition::new(id, from, to));
        Ok(())
    }

    /// Puts `token` into the input of `place`. Waits while the input is full.
    pub async fn offer(&self, place: &str, token: Token<P>) -> Result<(), NetError> {
        let core = self
            .topology
            .read()
            .places
            .get(place)
            .map(Place::handle)
            .ok_or_else(|| NetError::NotFound(PlaceId::from(place)))?;
        core.offer(token)
            .await
            .map_err(|_| NetError::NotInitialized(PlaceId::from(place)))
    }

    /// Same as [`Net::offer`].
    pub async fn markup(&self, place: &str, token: Token<P>) -> Result<(), NetError> {
        self.offer(place, token).await
    }

    /// Runs every place until all of them return, `parent` is cancelled, or
    /// [`Net::stop`] is called. The first place failure cancels the other
    /// places and is returned once they are done.
    ///
    /// The net is back to inactive once this returns or the future is dropped.
    pub async fn run(&self, parent: &Context) -> Result<(), NetError> {
        let (ctx, runners) = {
            let mut topology = self.topology.write();
            if topology.state.is_active() {
                return Err(NetError::Active);
            }
            let ctx = parent.child();
            let fabrics = fabric::wire::<P>(topology.transitions.values(), self.config.receiver_buffer);
            let runners: Vec<_> = topology
                .places
                .values()
                .map(|place| place.runner(&fabrics))
                .collect();
            topology.state = NetState::Active(ctx.clone());
            (ctx, runners)
        };
        let _guard = RunGuard {
            net: self,
            ctx: ctx.clone(),
        };
        log::info!("net {}: running {} places", self.id, runners.len());

        let mut places = JoinSet::new();
        for runner in runners {
            let ctx = ctx.clone();
            places.spawn(async move {
                let place = runner.id().clone();
                runner
                    .run(ctx)
                    .await
                    .map_err(|source| NetError::Place { place, source })
            });
        }

        let mut first = None;
        while let Some(joined) = places.join_next().await {
            let result = joined.unwrap_or_else(|err| Err(NetError::Panicked(err.to_string())));
            if let Err(err) = result {
                if first.is_none() {
                    log::debug!("net {}: {}, cancelling the run", self.id, err);
                    ctx.cancel();
                    first = Some(err);
                } else {
                    log::warn!("net {}: discarding secondary error: {}", self.id, err);
                }
            }
        }
        log::info!("net {}: run finished", self.id);
        first.map_or(Ok(()), Err)
    }

    /// Cancels the current run and marks the net inactive without waiting.
    pub fn stop(&self) -> Result<(), NetError> {
        let mut topology = self.topology.write();
        match std::mem::take(&mut topology.state) {
            NetState::Inactive => Err(NetError::Inactive),
            NetState::Active(ctx) => {
                log::info!("net {}: stopping", self.id);
                ctx.cancel();
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> NetStats {
        self.topology
            .read()
            .places
            .iter()
            .map(|(id, place)| (id.clone(), place.stats()))
            .collect()
    }

    pub fn to_dot(&self) -> String {
        let topology = self.topology.read();
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph \"{}\" {{", escape_label(&self.id));
        let _ = writeln!(&mut dot, "    rankdir=LR;");
        let _ = writeln!(&mut dot, "    node [fontname=\"Helvetica\"];");

        for id in topology.places.keys() {
            let _ = writeln!(
                &mut dot,
                "    \"place_{0}\" [label=\"{0}\", shape=circle, style=filled, fillcolor=\"#e3f2fd\"];",
                escape_label(id.as_str())
            );
        }
        for transition in topology.transitions.values() {
            let id = escape_label(transition.id().as_str());
            let _ = writeln!(
                &mut dot,
                "    \"trans_{0}\" [label=\"{0}\", shape=box, style=filled, fillcolor=\"#ffe0b2\"];",
                id
            );
            for sender in transition.senders() {
                let _ = writeln!(
                    &mut dot,
                    "    \"place_{}\" -> \"trans_{}\";",
                    escape_label(sender.as_str()),
                    id
                );
            }
            for receiver in transition.receivers() {
                let _ = writeln!(
                    &mut dot,
                    "    \"trans_{}\" -> \"place_{}\";",
                    id,
                    escape_label(receiver.as_str())
                );
            }
        }
        let _ = writeln!(&mut dot, "}}");
        dot
    }

    pub fn write_dot<Q: AsRef<Path>>(&self, path: Q) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_dot())
    }
}

impl<P> fmt::Debug for Net<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topology = self.topology.read();
        f.debug_struct("Net")
            .field("id", &self.id)
            .field("state", &topology.state)
            .field("places", &topology.places.values().collect::<Vec<_>>())
            .field("transitions", &topology.transitions.values().collect::<Vec<_>>())
            .finish()
    }
}

/// Returns the net to inactive when a run ends, unless a newer run took over.
struct RunGuard<'a, P> {
    net: &'a Net<P>,
    ctx: Context,
}

impl<P> Drop for RunGuard<'_, P> {
    fn drop(&mut self) {
        self.ctx.cancel();
        let mut topology = self.net.topology.write();
        if let NetState::Active(current) = &topology.state {
            if current.same_scope(&self.ctx) {
                topology.state = NetState::Inactive;
            }
        }
    }
}

fn first_duplicate(places: &[PlaceId]) -> Option<&PlaceId> {
    places
        .iter()
        .enumerate()
        .find(|(index, place)| places[..*index].contains(place))
        .map(|(_, place)| place)
}

fn escape_label(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
