//! minilab-core — shared types for the minilab measurement device.
//!
//! Holds the UDP wire protocol codec and the configuration layer.
//! No sockets, no hardware access — those live in minilab-net and in
//! external collaborators.

pub mod config;
pub mod proto;
