//! The memcached text protocol: request formatting ([`command`]), reply
//! parsing ([`response`]), and the retry-aware dispatch that drives a
//! [`crate::server::Server`] through both ([`engine`]).

mod command;
pub(crate) mod engine;
mod error;
mod response;

pub use response::{StatValue, StorageResult};

/// Keys longer than this (after namespacing) are rejected outright, never
/// autofixed. libmemcached's historical limit.
pub(crate) const MAX_KEY_LEN: usize = 250;

/// memcached's default `-I` slab chunk limit. Values larger than this are
/// rejected before anything is written to the wire.
pub(crate) const MAX_VALUE_LEN: usize = 1024 * 1024;
