//! 着色 Petri 网（CPN）执行引擎。
//!
//! Places run process functions concurrently; transitions join the tokens of
//! their sender places and copy the result to their receiver places. See
//! [`net`] for the runtime and [`process`] for the stock process functions.

pub mod config;
pub mod net;
pub mod options;
pub mod payload;
pub mod process;

pub use config::{NetDefinition, RuntimeConfig};
pub use net::{Context, Net, NetError, NetState, NetStats, Payload, PlaceId, Stats, Token, TransitionId};
