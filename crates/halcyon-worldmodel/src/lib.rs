//! `halcyon-worldmodel` — WorldModel (C4): a single markdown document under
//! a fixed schema, atomic replace-on-write, with structured updates that
//! archive their own history.

pub mod error;
pub mod model;
pub mod parse;

pub use error::{Result, WorldModelError};
pub use model::{Update, UpdateAction, WorldModel};
