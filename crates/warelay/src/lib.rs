//! warelay - relays HTTP-submitted messages into a WhatsApp chat.
//!
//! The WhatsApp web protocol itself is driven by an external automation
//! sidecar, reached through the [`bridge`] seam. This crate owns the glue:
//! destination resolution with a dual-keyed cache, the session lifecycle
//! (pairing, reconnection, retry), the HTTP API, and operator notification
//! of pairing codes by email.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod handlers;
pub mod mail;
pub mod notify;
pub mod resolver;
pub mod response;
pub mod server;
