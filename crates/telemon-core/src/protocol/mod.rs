//! Line Protocol
//!
//! Peers exchange newline-terminated text lines of the form
//! `<name> [<token> ...] [<key>=<value> ...]`. This module contains:
//! - `command`: the tolerant line parser producing a [`Command`]
//! - `request`: the closed set of requests the engine understands
//! - `wire`: helpers for rendering keyword lines back onto the wire

pub mod command;
pub mod request;
pub mod wire;

pub use command::Command;
pub use request::Request;
pub use wire::{format_keywords, quote, quote_if_needed};

/// Role the engine announces for itself during the identity handshake
pub const ENGINE_ROLE: &str = "monitor";
