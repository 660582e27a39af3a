//! `WebChat` — client-side real-time messaging core.
//!
//! Reliable message delivery over an unreliable event socket, with local
//! state reconciliation: optimistic sends, retry with backoff, conversation
//! ordering, and a typed event-subscription surface for presentation
//! layers.

pub mod client;
pub mod config;
pub mod crypto;
pub mod events;
pub mod outbox;
pub mod rest;
pub mod store;
pub mod transport;
