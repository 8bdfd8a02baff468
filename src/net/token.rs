//! 令牌：负载与溯源轨迹（每经过一次迁移追加一个检查点）。
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::net::ids::TransitionId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("payload type {type_name} does not support merging")]
    Unsupported { type_name: &'static str },
    #[error("payload {left} can not be merged with {right}")]
    Incompatible { left: String, right: String },
    #[error("merging {left} with {right} overflows")]
    Overflow { left: String, right: String },
}

/// Capability every token payload provides.
///
/// `merge` is only called at transitions with more than one sender. A type that
/// keeps `MERGEABLE = false` can still flow through the net, but the net refuses
/// to declare a joining transition for it.
pub trait Payload: Clone + Send + Sync + fmt::Debug + 'static {
    const MERGEABLE: bool = false;

    fn merge(self, other: Self) -> Result<Self, MergeError> {
        let _ = other;
        Err(MergeError::Unsupported {
            type_name: std::any::type_name::<Self>(),
        })
    }
}

/// A single transition crossing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub transition: TransitionId,
    pub when: DateTime<Utc>,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]",
            self.transition,
            self.when.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<P> {
    payload: P,
    trail: Vec<Checkpoint>,
}

impl<P: Payload> Token<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            trail: Vec::new(),
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Checkpoints in traversal order, most recent last.
    pub fn trail(&self) -> &[Checkpoint] {
        &self.trail
    }

    pub fn with_checkpoint(mut self, transition: TransitionId, when: DateTime<Utc>) -> Self {
        self.trail.push(Checkpoint { transition, when });
        self
    }

    /// Combines two tokens at a join. The provenance of `self` is kept.
    pub fn merge(self, other: Token<P>) -> Result<Self, MergeError> {
        let payload = self.payload.merge(other.payload)?;
        Ok(Self {
            payload,
            trail: self.trail,
        })
    }

    /// Comma-joined transition names, without timestamps.
    pub fn word(&self) -> String {
        self.trail
            .iter()
            .map(|cp| cp.transition.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<P: Payload> fmt::Display for Token<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: ", self.payload)?;
        for (idx, cp) in self.trail.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{cp}")?;
        }
        Ok(())
    }
}
