//! `halcyon-protocol` — the WebSocket wire protocol for the ManagementAPI
//! (spec.md §4.13, §6): request/response/event JSON frames and the set of
//! method names the gateway recognizes.

pub mod frames;
pub mod methods;

pub use frames::{EventFrame, HealthPayload, InboundFrame, ReqFrame, ResFrame};
