//! `WebChat` — data model and wire protocol for the messaging core.

pub mod conversation;
pub mod message;
pub mod normalize;
pub mod wire;
