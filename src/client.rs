//! The public client facade: key namespacing, routing across replication
//! groups (with failover), thread-discipline enforcement, and the
//! bincode-backed value (de)serialization built on top of the protocol
//! engine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config::ClientConfig;
use crate::continuum::{self, Continuum};
use crate::error::{Error, Result};
use crate::group::Group;
use crate::key::{is_invalid_cache_key, make_cache_key};
use crate::protocol::engine;
use crate::protocol::{StatValue, StorageResult, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::server::Server;

struct Inner {
    groups: Vec<Group>,
}

/// A client for a memcachedb cluster made of one or more named
/// replication groups. Reads are hashed onto a group via the ketama
/// continuum (bypassed entirely when there is only one group) and then
/// round-robin across that group's alive servers; writes always target
/// the group's elected master.
pub struct Client {
    namespace: String,
    separator: String,
    autofix_keys: bool,
    readonly: bool,
    no_reply: bool,
    check_size: bool,
    failover: bool,
    owner: Option<ThreadId>,
    continuum: Option<Continuum<usize>>,
    inner: Mutex<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut groups = Vec::with_capacity(config.groups.len());
        for spec in &config.groups {
            let servers = spec
                .servers
                .iter()
                .map(|s| Server::new(s.host.clone(), s.port, s.weight, config.timeout))
                .collect();
            groups.push(Group::new(spec.name.clone(), spec.weight, servers));
        }

        // Only built with 2+ groups: a single-group client has nowhere
        // else to route, so skip the continuum entirely.
        let continuum = if groups.len() >= 2 {
            let items = groups
                .iter()
                .enumerate()
                .map(|(idx, g)| (g.name().to_string(), g.weight(), idx))
                .collect();
            Some(Continuum::new(items))
        } else {
            None
        };

        let owner = if config.multithread {
            None
        } else {
            Some(thread::current().id())
        };

        Ok(Self {
            namespace: config.namespace.clone(),
            separator: config.namespace_separator.clone(),
            autofix_keys: config.autofix_keys,
            readonly: config.readonly,
            no_reply: config.no_reply,
            check_size: config.check_size,
            failover: config.failover,
            owner,
            continuum,
            inner: Mutex::new(Inner { groups }),
        })
    }

    fn check_thread(&self) -> Result<()> {
        match self.owner {
            Some(owner) if owner != thread::current().id() => Err(Error::ThreadDiscipline),
            _ => Ok(()),
        }
    }

    /// Reject mutating calls on a client built with `readonly(true)`.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::Argument("client is readonly".into()));
        }
        Ok(())
    }

    /// Autofix (if enabled) and namespace `key`, then reject the result if
    /// it still contains whitespace or exceeds [`MAX_KEY_LEN`] — a
    /// disabled or unsuccessful autofix surfaces here as an argument error.
    fn cache_key(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let cache_key = make_cache_key(&self.namespace, &self.separator, self.autofix_keys, key.as_ref());
        if is_invalid_cache_key(&cache_key) {
            return Err(Error::Argument(format!(
                "key is invalid: contains whitespace or exceeds {} bytes after namespacing",
                MAX_KEY_LEN
            )));
        }
        Ok(cache_key)
    }

    /// Route `cache_key` to a group index and run `op` against that
    /// group's master (`want_master`) or next round-robin slave. On
    /// failure, retries against up to 19 other groups (per the
    /// design notes' failover scheme) if `failover` is enabled and there
    /// is more than one group.
    fn with_server<R>(
        &self,
        cache_key: &[u8],
        want_master: bool,
        mut op: impl FnMut(&mut Server) -> Result<R>,
    ) -> Result<R> {
        let mut inner = self.inner.lock().unwrap();
        if inner.groups.is_empty() {
            return Err(Error::Routing("no groups configured".into()));
        }

        let mut run = |inner: &mut Inner, idx: usize| -> Result<R> {
            let group = &mut inner.groups[idx];
            let server = if want_master {
                group.master_mut()?
            } else {
                group.next_slave_mut()?
            };
            op(server)
        };

        if inner.groups.len() == 1 {
            return run(&mut inner, 0);
        }

        let continuum = self
            .continuum
            .as_ref()
            .expect("continuum is built whenever there are 2+ groups");

        let first_idx = *continuum
            .lookup(continuum::key_hash(cache_key))
            .ok_or_else(|| Error::Routing("No servers available".into()))?;

        // Per the routing design: test the group's liveness before even
        // attempting it, and only fall through to failover when either
        // the group is dead or the attempt itself failed.
        if inner.groups[first_idx].alive() {
            match run(&mut inner, first_idx) {
                Ok(value) => return Ok(value),
                Err(_) if !self.failover => {
                    return Err(Error::Routing("No servers available".into()))
                }
                Err(err) => {
                    warn!(error = %err, "initial routing attempt failed, trying failover");
                }
            }
        } else if !self.failover {
            return Err(Error::Routing("No servers available".into()));
        }

        for try_n in 1..20u32 {
            let mut buf = try_n.to_string().into_bytes();
            buf.extend_from_slice(cache_key);
            let idx = *continuum
                .lookup(continuum::key_hash(&buf))
                .ok_or_else(|| Error::Routing("No servers available".into()))?;
            if !inner.groups[idx].alive() {
                continue;
            }
            if let Ok(value) = run(&mut inner, idx) {
                return Ok(value);
            }
        }

        Err(Error::Routing("No servers available".into()))
    }

    fn check_payload_size(&self, payload: &[u8]) -> Result<()> {
        if self.check_size && payload.len() > MAX_VALUE_LEN {
            return Err(Error::Size(format!(
                "value of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_VALUE_LEN
            )));
        }
        Ok(())
    }

    pub fn get_raw<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        self.check_thread()?;
        let cache_key = self.cache_key(key)?;
        let result = self.with_server(&cache_key, false, |server| engine::get(server, &cache_key))?;
        Ok(result.map(|(bytes, _flags)| bytes))
    }

    pub fn get<K: AsRef<[u8]>, V: DeserializeOwned>(&self, key: K) -> Result<Option<V>> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        }
    }

    pub fn gets_raw<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<(Vec<u8>, u64)>> {
        self.check_thread()?;
        let cache_key = self.cache_key(key)?;
        let result = self.with_server(&cache_key, false, |server| engine::gets(server, &cache_key))?;
        Ok(result.map(|(bytes, _flags, cas)| (bytes, cas)))
    }

    /// Fan out `keys` across whichever groups they hash to, issuing one
    /// `get` per group and merging the results. A group whose servers are
    /// all dead simply contributes no entries for its keys rather than
    /// failing the whole call.
    pub fn multi_get_raw<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        self.check_thread()?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.groups.is_empty() {
            return Err(Error::Routing("no groups configured".into()));
        }

        let mut by_group: HashMap<usize, Vec<(Vec<u8>, Vec<u8>)>> = HashMap::new();
        for key in keys {
            let cache_key = self.cache_key(key.as_ref())?;
            let idx = if inner.groups.len() == 1 {
                0
            } else {
                let continuum = self
                    .continuum
                    .as_ref()
                    .expect("continuum is built whenever there are 2+ groups");
                *continuum
                    .lookup(continuum::key_hash(&cache_key))
                    .ok_or_else(|| Error::Routing("No servers available".into()))?
            };
            by_group
                .entry(idx)
                .or_default()
                .push((cache_key, key.as_ref().to_vec()));
        }

        let mut out = HashMap::new();
        for (idx, items) in by_group {
            let cache_keys: Vec<Vec<u8>> = items.iter().map(|(c, _)| c.clone()).collect();
            let group = &mut inner.groups[idx];
            let fetched = match group.next_slave_mut().and_then(|server| {
                engine::multi_get(server, &cache_keys)
            }) {
                Ok(map) => map,
                Err(err) => {
                    warn!(error = %err, "skipping group in multi_get");
                    continue;
                }
            };
            for (cache_key, original_key) in items {
                if let Some((bytes, _flags)) = fetched.get(&cache_key) {
                    out.insert(original_key, bytes.clone());
                }
            }
        }
        Ok(out)
    }

    pub fn multi_get<K: AsRef<[u8]>, V: DeserializeOwned>(
        &self,
        keys: &[K],
    ) -> Result<HashMap<Vec<u8>, V>> {
        let raw = self.multi_get_raw(keys)?;
        let mut out = HashMap::with_capacity(raw.len());
        for (key, bytes) in raw {
            out.insert(key, bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// `get`; on a miss, invoke `producer`, `add` its result under `expiry`
    /// and return it. `add` (not `set`) is deliberate: if another writer
    /// populated the key between the `get` and the `add`, their value
    /// wins and this call still hands the caller a usable value of its
    /// own without a second round trip.
    pub fn fetch<K, V, F>(&self, key: K, expiry: u32, producer: F) -> Result<V>
    where
        K: AsRef<[u8]> + Clone,
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(key.clone())? {
            return Ok(value);
        }
        let value = producer()?;
        self.add(key, &value, expiry)?;
        Ok(value)
    }

    fn store_raw<K: AsRef<[u8]>>(
        &self,
        verb: &str,
        key: K,
        payload: &[u8],
        expiry: u32,
        cas: Option<u64>,
    ) -> Result<StorageResult> {
        self.check_thread()?;
        self.check_writable()?;
        self.check_payload_size(payload)?;
        let cache_key = self.cache_key(key)?;
        let result = self.with_server(&cache_key, true, |server| {
            engine::store(server, verb, &cache_key, 0, expiry, payload, self.no_reply, cas)
        })?;
        Ok(result.unwrap_or(StorageResult::Stored))
    }

    pub fn set_raw<K: AsRef<[u8]>>(&self, key: K, payload: &[u8], expiry: u32) -> Result<StorageResult> {
        self.store_raw("set", key, payload, expiry, None)
    }

    pub fn set<K: AsRef<[u8]>, V: Serialize>(
        &self,
        key: K,
        value: &V,
        expiry: u32,
    ) -> Result<StorageResult> {
        self.set_raw(key, &bincode::serialize(value)?, expiry)
    }

    pub fn add_raw<K: AsRef<[u8]>>(&self, key: K, payload: &[u8], expiry: u32) -> Result<StorageResult> {
        self.store_raw("add", key, payload, expiry, None)
    }

    pub fn add<K: AsRef<[u8]>, V: Serialize>(
        &self,
        key: K,
        value: &V,
        expiry: u32,
    ) -> Result<StorageResult> {
        self.add_raw(key, &bincode::serialize(value)?, expiry)
    }

    pub fn replace_raw<K: AsRef<[u8]>>(
        &self,
        key: K,
        payload: &[u8],
        expiry: u32,
    ) -> Result<StorageResult> {
        self.store_raw("replace", key, payload, expiry, None)
    }

    pub fn replace<K: AsRef<[u8]>, V: Serialize>(
        &self,
        key: K,
        value: &V,
        expiry: u32,
    ) -> Result<StorageResult> {
        self.replace_raw(key, &bincode::serialize(value)?, expiry)
    }

    pub fn cas_raw<K: AsRef<[u8]>>(
        &self,
        key: K,
        payload: &[u8],
        expiry: u32,
        cas: u64,
    ) -> Result<StorageResult> {
        self.store_raw("cas", key, payload, expiry, Some(cas))
    }

    pub fn cas<K: AsRef<[u8]>, V: Serialize>(
        &self,
        key: K,
        value: &V,
        expiry: u32,
        cas: u64,
    ) -> Result<StorageResult> {
        self.cas_raw(key, &bincode::serialize(value)?, expiry, cas)
    }

    fn append_prepend_raw<K: AsRef<[u8]>>(
        &self,
        verb: &str,
        key: K,
        payload: &[u8],
    ) -> Result<StorageResult> {
        self.check_thread()?;
        self.check_writable()?;
        self.check_payload_size(payload)?;
        let cache_key = self.cache_key(key)?;
        let result = self.with_server(&cache_key, true, |server| {
            engine::append_prepend(server, verb, &cache_key, payload, self.no_reply)
        })?;
        Ok(result.unwrap_or(StorageResult::Stored))
    }

    pub fn append_raw<K: AsRef<[u8]>>(&self, key: K, payload: &[u8]) -> Result<StorageResult> {
        self.append_prepend_raw("append", key, payload)
    }

    pub fn prepend_raw<K: AsRef<[u8]>>(&self, key: K, payload: &[u8]) -> Result<StorageResult> {
        self.append_prepend_raw("prepend", key, payload)
    }

    fn incr_decr<K: AsRef<[u8]>>(&self, verb: &str, key: K, amount: u64) -> Result<Option<u64>> {
        self.check_thread()?;
        self.check_writable()?;
        let cache_key = self.cache_key(key)?;
        self.with_server(&cache_key, true, |server| {
            engine::incr_decr(server, verb, &cache_key, amount, self.no_reply)
        })
    }

    pub fn incr<K: AsRef<[u8]>>(&self, key: K, amount: u64) -> Result<Option<u64>> {
        self.incr_decr("incr", key, amount)
    }

    pub fn decr<K: AsRef<[u8]>>(&self, key: K, amount: u64) -> Result<Option<u64>> {
        self.incr_decr("decr", key, amount)
    }

    /// Returns `true` if the key existed and was deleted, `false` if it
    /// was not found.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.check_thread()?;
        self.check_writable()?;
        let cache_key = self.cache_key(key)?;
        let result = self.with_server(&cache_key, true, |server| {
            engine::delete(server, &cache_key, self.no_reply)
        })?;
        Ok(self.no_reply || result.is_some())
    }

    /// `stats` against every currently alive server in every group
    /// (masters and slaves alike), keyed by endpoint.
    pub fn stats(&self) -> Result<HashMap<String, HashMap<String, StatValue>>> {
        self.check_thread()?;
        let mut inner = self.inner.lock().unwrap();
        let mut out = HashMap::new();
        for group in inner.groups.iter_mut() {
            for server in group.servers_mut() {
                if !server.alive() {
                    continue;
                }
                let endpoint = server.endpoint();
                match engine::stats(server) {
                    Ok(values) => {
                        out.insert(endpoint, values);
                    }
                    Err(err) => {
                        warn!(endpoint = %endpoint, error = %err, "stats call failed");
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupSpec, ServerSpec};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    /// Accepts exactly one connection and answers each request in turn by
    /// calling `handler` with the trimmed command line. Storage-verb
    /// requests have their payload bytes consumed (and discarded) so the
    /// socket stays in sync even when the test doesn't care about the
    /// written bytes. An empty reply is treated as a `noreply` write: the
    /// server reads the request but sends nothing back.
    fn spawn_mock(mut handler: impl FnMut(&str) -> Vec<u8> + Send + 'static) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let join = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).unwrap_or(0);
                if n == 0 {
                    break;
                }
                let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
                if trimmed.is_empty() {
                    break;
                }
                let parts: Vec<&str> = trimmed.split(' ').collect();
                if matches!(parts[0], "set" | "add" | "replace" | "append" | "prepend" | "cas") {
                    if let Some(bytelen) = parts.get(4).and_then(|s| s.parse::<usize>().ok()) {
                        let mut discard = vec![0_u8; bytelen + 2];
                        if reader.read_exact(&mut discard).is_err() {
                            break;
                        }
                    }
                }
                let reply = handler(&trimmed);
                if !reply.is_empty() && writer.write_all(&reply).is_err() {
                    break;
                }
            }
        });
        (port, join)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn one_group_config(port: u16) -> ClientConfig {
        ClientConfig::new(vec![GroupSpec::new(
            "g",
            vec![ServerSpec::new("127.0.0.1", port)],
        )])
    }

    #[test]
    fn test_basic_set_get() {
        let (port, handle) = spawn_mock(|cmd| match cmd {
            "set CLIENT_TEST_MASTER 0 0 1" => b"STORED\r\n".to_vec(),
            "set my_namespace:key 0 0 5" => b"STORED\r\n".to_vec(),
            "get my_namespace:key" => b"VALUE my_namespace:key 0 5\r\nvalue\r\nEND\r\n".to_vec(),
            other => panic!("unexpected request: {}", other),
        });

        let config = one_group_config(port).namespace("my_namespace");
        let client = Client::new(config).unwrap();

        assert_eq!(StorageResult::Stored, client.set_raw("key", b"value", 0).unwrap());
        assert_eq!(Some(b"value".to_vec()), client.get_raw("key").unwrap());

        // Drop the client (and its socket) before joining: the mock loop
        // only returns once it sees EOF.
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn test_oversize_value_rejected_before_any_write() {
        // Nothing is listening here; if the size check didn't run before
        // routing, this call would hang or fail with a transport error
        // instead of a size error.
        let config = one_group_config(1);
        let client = Client::new(config).unwrap();
        let big = vec![b'v'; MAX_VALUE_LEN + 1];
        match client.set_raw("k", &big, 0) {
            Err(Error::Size(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("expected a size error, got {:?}", other),
        }
    }

    #[test]
    fn test_readonly_client_rejects_writes() {
        let config = one_group_config(1).readonly(true);
        let client = Client::new(config).unwrap();
        assert!(matches!(client.set_raw("k", b"v", 0), Err(Error::Argument(_))));
        assert!(matches!(client.delete("k"), Err(Error::Argument(_))));
        assert!(matches!(client.incr("k", 1), Err(Error::Argument(_))));
    }

    #[test]
    fn test_single_thread_client_rejects_other_thread() {
        let config = one_group_config(1).multithread(false);
        let client = Arc::new(Client::new(config).unwrap());
        let other = client.clone();
        let result = thread::spawn(move || other.get_raw("k")).join().unwrap();
        assert!(matches!(result, Err(Error::ThreadDiscipline)));
    }

    #[test]
    fn test_multi_get_skips_a_dead_group() {
        init_tracing();
        let mut values: HashMap<&str, &str> = HashMap::new();
        values.insert("a", "0123456789");
        values.insert("b", "1111111111");
        values.insert("c", "2222222222");

        // Not joined: depending on where the ketama continuum routes "a",
        // "b" and "c", this group may never receive a connection at all,
        // in which case its `accept()` would block forever.
        let (good_port, _good_handle) = spawn_mock(move |cmd| {
            if !cmd.starts_with("get ") {
                return Vec::new();
            }
            let mut out = Vec::new();
            for key in cmd.trim_start_matches("get ").split(' ') {
                if let Some(value) = values.get(key) {
                    out.extend_from_slice(
                        format!("VALUE {} 0 {}\r\n{}\r\n", key, value.len(), value).as_bytes(),
                    );
                }
            }
            out.extend_from_slice(b"END\r\n");
            out
        });
        // Never replies in a way the protocol can parse; its group is
        // skipped for whichever keys happen to hash onto it.
        let (bad_port, _bad_handle) = spawn_mock(|_cmd| b"GARBAGE\r\n".to_vec());

        let config = ClientConfig::new(vec![
            GroupSpec::new("good", vec![ServerSpec::new("127.0.0.1", good_port)]),
            GroupSpec::new("bad", vec![ServerSpec::new("127.0.0.1", bad_port)]),
        ]);
        let client = Client::new(config).unwrap();

        let keys = ["a", "b", "c"];
        let result = client.multi_get_raw(&keys).unwrap();
        for (key, value) in &result {
            let key_str = std::str::from_utf8(key).unwrap();
            assert_eq!(values[key_str].as_bytes(), value.as_slice());
        }
    }

    #[test]
    fn test_failover_reaches_the_surviving_group() {
        init_tracing();
        let (good_port, good_handle) = spawn_mock(|cmd| {
            assert_eq!("get foo", cmd);
            b"VALUE foo 0 3\r\nbar\r\nEND\r\n".to_vec()
        });
        // Nothing listens on port 1: every attempt to reach this group
        // fails to connect.
        let config = ClientConfig::new(vec![
            GroupSpec::new("bad", vec![ServerSpec::new("127.0.0.1", 1)]),
            GroupSpec::new("good", vec![ServerSpec::new("127.0.0.1", good_port)]),
        ])
        .failover(true);
        let client = Client::new(config).unwrap();

        assert_eq!(Some(b"bar".to_vec()), client.get_raw("foo").unwrap());
        drop(client);
        good_handle.join().unwrap();
    }

    #[test]
    fn test_failover_disabled_fails_fast_when_every_group_is_dead() {
        let config = ClientConfig::new(vec![
            GroupSpec::new("bad1", vec![ServerSpec::new("127.0.0.1", 1)]),
            GroupSpec::new("bad2", vec![ServerSpec::new("127.0.0.1", 2)]),
        ])
        .failover(false);
        let client = Client::new(config).unwrap();

        match client.get_raw("foo") {
            Err(Error::Routing(msg)) => assert_eq!("No servers available", msg),
            other => panic!("expected a routing error, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_calls_producer_on_miss_and_adds_result() {
        let (port, handle) = spawn_mock(|cmd| {
            if cmd == "get my_namespace:key" {
                b"END\r\n".to_vec()
            } else if cmd == "set CLIENT_TEST_MASTER 0 0 1" {
                b"STORED\r\n".to_vec()
            } else if cmd.starts_with("add my_namespace:key") {
                b"STORED\r\n".to_vec()
            } else {
                panic!("unexpected request: {}", cmd)
            }
        });
        let config = one_group_config(port).namespace("my_namespace");
        let client = Client::new(config).unwrap();

        let value = client
            .fetch("key", 0, || Ok("default".to_string()))
            .unwrap();
        assert_eq!("default", value);

        drop(client);
        handle.join().unwrap();
    }
}
