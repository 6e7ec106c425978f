//! Channel adapters (Discord, Gmail, a voice subprocess, CLI readline, …)
//! and the hub that starts/stops/dispatches them (spec.md §4.14). Concrete
//! adapters live in `halcyon-gateway`, since each needs its own transport
//! dependencies (HTTP clients, websockets, subprocess pipes) this crate
//! should not carry.

pub mod channel;
pub mod error;
pub mod hub;
pub mod types;

pub use channel::{ChannelAdapter, InboundHandler};
pub use error::ChannelError;
pub use hub::ChannelHub;
pub use types::{ChannelStatus, OutboundMessage};
