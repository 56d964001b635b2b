//! Wire-level request, response and event types.

pub mod common;
pub mod events;
pub mod health;
pub mod room;
pub mod validation;
pub mod ws;
