//! A replication group: one elected master plus its slaves, all drawn
//! from the same pool of servers. Reads round-robin across every server
//! in the group (master included); writes always target the master.

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::engine;
use crate::protocol::StorageResult;
use crate::server::Server;

/// The probe key used to find the master: whichever server in the group
/// accepts a `set` on this key is the one accepting writes.
const MASTER_PROBE_KEY: &[u8] = b"CLIENT_TEST_MASTER";

pub(crate) struct Group {
    name: String,
    weight: u32,
    servers: Vec<Server>,
    master_idx: Option<usize>,
    next_slave: usize,
}

impl Group {
    pub(crate) fn new(name: String, weight: u32, servers: Vec<Server>) -> Self {
        Self {
            name,
            weight,
            servers,
            master_idx: None,
            next_slave: 0,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The group's share of continuum points. Independent of the
    /// individual servers' own weights, which are unused by the
    /// continuum — the keyspace is hashed over group names, not hosts.
    pub(crate) fn weight(&self) -> u32 {
        self.weight
    }

    /// True if at least one server in the group is currently usable.
    pub(crate) fn alive(&self) -> bool {
        self.servers.iter().any(Server::alive)
    }

    /// Elect (or reuse the cached) master, probing each alive server with
    /// a `set` on [`MASTER_PROBE_KEY`] until one replies `STORED`.
    ///
    /// This writes a real key into the database as an observable side
    /// effect. The wire command is preserved exactly as memcachedb's own
    /// clients send it; changing it would break master discovery against
    /// a real server.
    pub(crate) fn master_mut(&mut self) -> Result<&mut Server> {
        if let Some(idx) = self.master_idx {
            if self.servers[idx].alive() {
                return Ok(&mut self.servers[idx]);
            }
            self.master_idx = None;
        }

        for idx in 0..self.servers.len() {
            if !self.servers[idx].alive() {
                continue;
            }
            let probe = engine::store(
                &mut self.servers[idx],
                "set",
                MASTER_PROBE_KEY,
                0,
                0,
                b"0",
                false,
                None,
            );
            if let Ok(Some(StorageResult::Stored)) = probe {
                debug!(group = %self.name, endpoint = %self.servers[idx].endpoint(), "elected master");
                self.master_idx = Some(idx);
                return Ok(&mut self.servers[idx]);
            }
        }

        Err(Error::Routing(format!(
            "group {} has no reachable master",
            self.name
        )))
    }

    /// The next server to read from, round-robining across every alive
    /// server in the group (master included). Skips dead/quarantined
    /// servers; fails if none are alive.
    pub(crate) fn next_slave_mut(&mut self) -> Result<&mut Server> {
        let len = self.servers.len();
        if len == 0 {
            return Err(Error::Routing(format!("group {} has no servers", self.name)));
        }
        for step in 0..len {
            let idx = (self.next_slave + step) % len;
            if self.servers[idx].alive() {
                self.next_slave = (idx + 1) % len;
                return Ok(&mut self.servers[idx]);
            }
        }
        Err(Error::Routing(format!(
            "group {} has no reachable servers",
            self.name
        )))
    }

    pub(crate) fn servers_mut(&mut self) -> &mut [Server] {
        &mut self.servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_server() -> Server {
        Server::new("127.0.0.1".into(), 1, 1, Some(Duration::from_millis(20)))
    }

    #[test]
    fn test_group_weight_is_independent_of_servers() {
        let group = Group::new(
            "g".into(),
            3,
            vec![
                Server::new("a".into(), 11211, 1, None),
                Server::new("b".into(), 11211, 1, None),
            ],
        );
        assert_eq!(3, group.weight());
    }

    #[test]
    fn test_round_robin_skips_dead_servers() {
        let mut group = Group::new(
            "g".into(),
            1,
            vec![unreachable_server(), unreachable_server()],
        );
        assert!(group.next_slave_mut().is_err());
    }

    #[test]
    fn test_master_election_fails_with_no_servers_alive() {
        let mut group = Group::new("g".into(), 1, vec![unreachable_server()]);
        assert!(group.master_mut().is_err());
    }
}
