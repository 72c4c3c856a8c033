//! Client for a memcachedb cluster.
//!
//! Keys are routed across named replication groups with ketama consistent
//! hashing (SHA-1 over `"<group>:<point>"`), each group has one elected
//! master that serves writes while every server in the group (master
//! included) serves reads round-robin, and all of it speaks the
//! memcached text protocol over plain, lazily-connected TCP sockets.
//!
//! ```no_run
//! use memcachedb_client::{Client, ClientConfig, GroupSpec, ServerSpec};
//!
//! let config = ClientConfig::new(vec![
//!     GroupSpec::new("shard-a", vec![
//!         ServerSpec::new("10.0.0.1", 11211),
//!         ServerSpec::new("10.0.0.2", 11211),
//!     ]),
//!     GroupSpec::new("shard-b", vec![
//!         ServerSpec::new("10.0.1.1", 11211),
//!     ]),
//! ])
//! .namespace("myapp");
//!
//! let client = Client::new(config)?;
//! client.set("user:1", &"alice", 0)?;
//! let value: Option<String> = client.get("user:1")?;
//! # Ok::<(), memcachedb_client::Error>(())
//! ```

mod buffered_reader;
mod client;
mod config;
mod continuum;
mod error;
mod group;
mod key;
mod protocol;
mod server;

pub use client::Client;
pub use config::{ClientConfig, GroupSpec, ServerSpec};
pub use error::{Error, Result};
pub use protocol::{StatValue, StorageResult};
