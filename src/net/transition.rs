use crate::net::ids::{PlaceId, TransitionId};

/// Binding of an ordered sender set to an ordered receiver set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    id: TransitionId,
    senders: Vec<PlaceId>,
    receivers: Vec<PlaceId>,
}

impl Transition {
    pub fn new(id: TransitionId, senders: Vec<PlaceId>, receivers: Vec<PlaceId>) -> Self {
        Self {
            id,
            senders,
            receivers,
        }
    }

    pub fn id(&self) -> &TransitionId {
        &self.id
    }

    pub fn senders(&self) -> &[PlaceId] {
        &self.senders
    }

    pub fn receivers(&self) -> &[PlaceId] {
        &self.receivers
    }
}
