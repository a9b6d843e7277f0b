//! minilab-io — the device's channel table.
//!
//! `registry` owns the bounded channel table and the per-channel remote
//! value cache; `matcher` is the only code path that mutates the cache.

pub mod matcher;
pub mod registry;

pub use registry::{
    Channel, ChannelSnapshot, IoRegistry, Origin, RegistryError, RemoteBinding, RemoteSnapshot,
    RemoteState, RemoteStatus, MAX_CHANNELS,
};
