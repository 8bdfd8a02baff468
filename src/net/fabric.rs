//! 迁移同步结构（fabric）：汇合（AND-join）、分发（AND-split）与竞争仲裁。
//!
//! A fabric lives for one run of the net. Offers are collected in rounds: one
//! slot per sender, and a round fires once every slot is filled. A sender
//! first reserves its slot (the "ready" signal), then fills it. While a round
//! is being delivered the fabric accepts no reservations, so a sender never
//! has more than one offer pending in a fabric.
//!
//! Fabrics whose sender sets overlap share one [`Arbiter`]. A sender may only
//! open a round when no open round of the group includes it; otherwise it has
//! to complete the round that is already waiting. Competing transitions with
//! the same senders therefore never split one batch of offers between them.
//!
//! Firing happens on the task of the sender that completes the round: the
//! offers are folded in declared sender order and the result is delivered to
//! every receiver concurrently.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::token::{MergeError, Payload, Token};
use crate::net::transition::Transition;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("place {place} is not a sender of transition {transition}")]
    UnknownSender {
        transition: TransitionId,
        place: PlaceId,
    },
    #[error("place {place} is not a receiver of transition {transition}")]
    UnknownReceiver {
        transition: TransitionId,
        place: PlaceId,
    },
    #[error("transition {transition} can't join its offers: {source}")]
    Merge {
        transition: TransitionId,
        #[source]
        source: MergeError,
    },
}

enum Slot<P> {
    Empty,
    Reserved,
    Filled(Token<P>),
}

struct Round<P> {
    slots: Vec<Slot<P>>,
    firing: bool,
}

impl<P> Round<P> {
    fn is_open(&self) -> bool {
        self.slots.iter().any(|slot| !matches!(slot, Slot::Empty))
    }
}

/// Round bookkeeping of a group of fabrics with overlapping senders.
struct Arbiter<P> {
    senders: Vec<Vec<PlaceId>>,
    rounds: Mutex<Vec<Round<P>>>,
    changed: Notify,
}

impl<P> Arbiter<P> {
    fn new(senders: Vec<Vec<PlaceId>>) -> Self {
        let rounds = senders
            .iter()
            .map(|senders| Round {
                slots: senders.iter().map(|_| Slot::Empty).collect(),
                firing: false,
            })
            .collect();
        Self {
            senders,
            rounds: Mutex::new(rounds),
            changed: Notify::new(),
        }
    }

    fn try_reserve(&self, member: usize, index: usize) -> bool {
        let mut rounds = self.rounds.lock();
        let round = &rounds[member];
        if round.firing || !matches!(round.slots[index], Slot::Empty) {
            return false;
        }
        if !round.is_open() {
            let sender = &self.senders[member][index];
            let owed = rounds
                .iter()
                .zip(&self.senders)
                .enumerate()
                .any(|(other, (round, senders))| {
                    other != member && round.is_open() && senders.contains(sender)
                });
            if owed {
                return false;
            }
        }
        rounds[member].slots[index] = Slot::Reserved;
        true
    }

    async fn reserve(&self, member: usize, index: usize) {
        loop {
            // Registered before the check so a change in between still wakes us.
            let changed = self.changed.notified();
            if self.try_reserve(member, index) {
                return;
            }
            changed.await;
        }
    }

    fn release(&self, member: usize, index: usize) {
        let mut rounds = self.rounds.lock();
        let slot = &mut rounds[member].slots[index];
        if matches!(slot, Slot::Reserved) {
            *slot = Slot::Empty;
            drop(rounds);
            self.changed.notify_waiters();
        }
    }

    /// Fills a reserved slot; returns the offers if this closed the round.
    fn deposit(&self, member: usize, index: usize, token: Token<P>) -> Option<Vec<Token<P>>> {
        let mut rounds = self.rounds.lock();
        let round = &mut rounds[member];
        debug_assert!(matches!(round.slots[index], Slot::Reserved), "offer without reservation");
        round.slots[index] = Slot::Filled(token);
        if !round.slots.iter().all(|slot| matches!(slot, Slot::Filled(_))) {
            return None;
        }
        let offers = round
            .slots
            .iter_mut()
            .filter_map(|slot| match std::mem::replace(slot, Slot::Empty) {
                Slot::Filled(token) => Some(token),
                _ => None,
            })
            .collect();
        round.firing = true;
        drop(rounds);
        self.changed.notify_waiters();
        Some(offers)
    }

    fn fired(&self, member: usize) {
        self.rounds.lock()[member].firing = false;
        self.changed.notify_waiters();
    }
}

pub struct Fabric<P> {
    transition: TransitionId,
    senders: Vec<PlaceId>,
    receivers: Vec<PlaceId>,
    arbiter: Arc<Arbiter<P>>,
    member: usize,
    outlets: Vec<mpsc::Sender<Token<P>>>,
    inlets: Vec<tokio::sync::Mutex<mpsc::Receiver<Token<P>>>>,
}

impl<P: Payload> Fabric<P> {
    /// A fabric that competes with no other transition.
    pub fn new(transition: &Transition, receiver_buffer: usize) -> Self {
        let arbiter = Arc::new(Arbiter::new(vec![transition.senders().to_vec()]));
        Self::with_arbiter(transition, receiver_buffer, arbiter, 0)
    }

    fn with_arbiter(
        transition: &Transition,
        receiver_buffer: usize,
        arbiter: Arc<Arbiter<P>>,
        member: usize,
    ) -> Self {
        let (outlets, inlets): (Vec<_>, Vec<_>) = transition
            .receivers()
            .iter()
            .map(|_| {
                let (tx, rx) = mpsc::channel(receiver_buffer.max(1));
                (tx, tokio::sync::Mutex::new(rx))
            })
            .unzip();
        Self {
            transition: transition.id().clone(),
            senders: transition.senders().to_vec(),
            receivers: transition.receivers().to_vec(),
            arbiter,
            member,
            outlets,
            inlets,
        }
    }

    pub fn transition(&self) -> &TransitionId {
        &self.transition
    }

    /// Ready signals for `sender`. Each call starts a fresh sequence.
    pub fn ready_send(self: &Arc<Self>, sender: &PlaceId) -> Result<ReadySignals<P>, FabricError> {
        let index = self.sender_index(sender)?;
        Ok(ReadySignals {
            fabric: Arc::clone(self),
            index,
        })
    }

    /// Offers `token` on behalf of `sender`, waiting until the fabric takes it.
    pub async fn send(self: &Arc<Self>, sender: &PlaceId, token: Token<P>) -> Result<(), FabricError> {
        let permit = self.ready_send(sender)?.next().await;
        permit.send(token).await
    }

    /// Next firing addressed to `receiver`; `None` once every outlet is gone.
    pub async fn recv(&self, receiver: &PlaceId) -> Result<Option<Token<P>>, FabricError> {
        let index = self.receiver_index(receiver)?;
        let mut inlet = self.inlets[index].lock().await;
        Ok(inlet.recv().await)
    }

    /// Stops delivering to `receiver`. Later firings skip it, and a delivery
    /// already waiting on it gives up.
    pub async fn close_receiver(&self, receiver: &PlaceId) -> Result<(), FabricError> {
        let index = self.receiver_index(receiver)?;
        self.inlets[index].lock().await.close();
        Ok(())
    }

    fn sender_index(&self, sender: &PlaceId) -> Result<usize, FabricError> {
        self.senders
            .iter()
            .position(|place| place == sender)
            .ok_or_else(|| FabricError::UnknownSender {
                transition: self.transition.clone(),
                place: sender.clone(),
            })
    }

    fn receiver_index(&self, receiver: &PlaceId) -> Result<usize, FabricError> {
        self.receivers
            .iter()
            .position(|place| place == receiver)
            .ok_or_else(|| FabricError::UnknownReceiver {
                transition: self.transition.clone(),
                place: receiver.clone(),
            })
    }

    async fn fire(&self, offers: Vec<Token<P>>) -> Result<(), FabricError> {
        let mut offers = offers.into_iter();
        let Some(first) = offers.next() else {
            return Ok(());
        };
        let token = offers
            .try_fold(first, Token::merge)
            .map_err(|source| FabricError::Merge {
                transition: self.transition.clone(),
                source,
            })?;
        log::trace!("transition {} fired: {}", self.transition, token);

        let deliveries = self.outlets.iter().zip(&self.receivers).map(|(outlet, receiver)| {
            let token = token.clone();
            async move {
                if outlet.send(token).await.is_err() {
                    log::debug!("transition {}: receiver {} is closed", self.transition, receiver);
                }
            }
        });
        futures::future::join_all(deliveries).await;
        Ok(())
    }
}

impl<P> fmt::Debug for Fabric<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabric")
            .field("transition", &self.transition)
            .field("senders", &self.senders)
            .field("receivers", &self.receivers)
            .finish()
    }
}

/// Fabrics for one run, keyed by transition. Transitions sharing a sender,
/// directly or through others, share an arbiter.
pub(crate) fn wire<'a, P: Payload>(
    transitions: impl IntoIterator<Item = &'a Transition>,
    receiver_buffer: usize,
) -> HashMap<TransitionId, Arc<Fabric<P>>> {
    let transitions: Vec<&Transition> = transitions.into_iter().collect();
    let mut group: Vec<usize> = (0..transitions.len()).collect();
    for (i, left) in transitions.iter().enumerate() {
        for (j, right) in transitions.iter().enumerate().skip(i + 1) {
            let shared = left.senders().iter().any(|place| right.senders().contains(place));
            if shared && group[i] != group[j] {
                let (from, to) = (group[j], group[i]);
                group.iter_mut().filter(|g| **g == from).for_each(|g| *g = to);
            }
        }
    }
    let mut groups: IndexMap<usize, Vec<&Transition>> = IndexMap::new();
    for (transition, group) in transitions.iter().zip(group) {
        groups.entry(group).or_default().push(transition);
    }

    let mut fabrics = HashMap::with_capacity(transitions.len());
    for members in groups.into_values() {
        let arbiter = Arc::new(Arbiter::new(
            members.iter().map(|transition| transition.senders().to_vec()).collect(),
        ));
        if members.len() > 1 {
            log::debug!(
                "transitions {:?} compete for shared senders",
                members.iter().map(|transition| transition.id()).collect::<Vec<_>>()
            );
        }
        for (member, transition) in members.into_iter().enumerate() {
            let fabric = Fabric::with_arbiter(transition, receiver_buffer, Arc::clone(&arbiter), member);
            fabrics.insert(transition.id().clone(), Arc::new(fabric));
        }
    }
    fabrics
}

/// Lazy, unbounded sequence of ready signals for one sender.
pub struct ReadySignals<P> {
    fabric: Arc<Fabric<P>>,
    index: usize,
}

impl<P: Payload> ReadySignals<P> {
    pub fn transition(&self) -> &TransitionId {
        &self.fabric.transition
    }

    /// Waits until the fabric wants this sender's next offer.
    pub async fn next(&self) -> SendPermit<P> {
        self.fabric.arbiter.reserve(self.fabric.member, self.index).await;
        SendPermit {
            fabric: Arc::clone(&self.fabric),
            index: self.index,
            spent: false,
        }
    }
}

/// Reserved slot for exactly one offer. Dropping it unused gives the slot back.
pub struct SendPermit<P> {
    fabric: Arc<Fabric<P>>,
    index: usize,
    spent: bool,
}

impl<P: Payload> SendPermit<P> {
    pub fn transition(&self) -> &TransitionId {
        &self.fabric.transition
    }

    pub async fn send(mut self, token: Token<P>) -> Result<(), FabricError> {
        self.spent = true;
        let member = self.fabric.member;
        let Some(offers) = self.fabric.arbiter.deposit(member, self.index, token) else {
            return Ok(());
        };
        let _firing = Firing {
            arbiter: &self.fabric.arbiter,
            member,
        };
        self.fabric.fire(offers).await
    }
}

impl<P> Drop for SendPermit<P> {
    fn drop(&mut self) {
        if !self.spent {
            self.fabric.arbiter.release(self.fabric.member, self.index);
        }
    }
}

/// Reopens the fabric once a firing is delivered, failed or abandoned.
struct Firing<'a, P> {
    arbiter: &'a Arbiter<P>,
    member: usize,
}

impl<P> Drop for Firing<'_, P> {
    fn drop(&mut self) {
        self.arbiter.fired(self.member);
    }
}
