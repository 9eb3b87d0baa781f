//! One entry point per capability. Each returns `Ok(None)` when the server
//! answered but had nothing to report, and `Err` when it could not answer.

use tracing::{debug, info};

use crate::{
    config::MonitorConfig,
    connection::{CacheClient, Item, KeyHash},
    error::{Error, Result},
    parser::{
        SizeHistogram, SlabStats, ServerStats, cachedump_command, parse_flat_stats,
        parse_key_scan, parse_size_histogram, parse_slab_stats,
    },
    pool::ConnectionPool,
    top::{Display, StopSignal, TopMonitor},
};

pub fn server_stats(client: &dyn CacheClient) -> Result<Option<ServerStats>> {
    flat(client, "stats")
}

pub fn settings(client: &dyn CacheClient) -> Result<Option<ServerStats>> {
    flat(client, "stats settings")
}

fn flat(client: &dyn CacheClient, command: &str) -> Result<Option<ServerStats>> {
    let stats = parse_flat_stats(&client.request(command)?);
    debug!(server = %client.identity(), command, entries = stats.len(), "parsed");
    Ok((!stats.is_empty()).then_some(stats))
}

pub fn slab_stats(client: &dyn CacheClient) -> Result<Option<SlabStats>> {
    let items = client.request("stats items")?;
    let slabs = client.request("stats slabs")?;
    let stats = parse_slab_stats(&items, &slabs);
    Ok((!stats.is_empty()).then_some(stats))
}

/// Fails with [`Error::Unavailable`] when the server reports a
/// `sizes_status` instead of a histogram.
pub fn size_histogram(client: &dyn CacheClient) -> Result<Option<SizeHistogram>> {
    let text = client.request("stats sizes")?;
    let sizes = parse_size_histogram(&text);
    if !sizes.is_empty() {
        return Ok(Some(sizes));
    }
    match parse_flat_stats(&text).get("sizes_status") {
        Some(status) => Err(Error::Unavailable {
            server: client.identity().to_string(),
            what: "size histogram",
            status: format!("sizes_status {status}"),
        }),
        None => Ok(None),
    }
}

/// Keys of one slab class, at most `limit` of them (0 lets the server pick).
pub fn keys_in_slab(client: &dyn CacheClient, slab: u32, limit: usize) -> Result<Option<Vec<String>>> {
    let dump = client.request(&cachedump_command(slab, limit))?;
    Ok(parse_key_scan(&dump, Some(limit)))
}

/// Keys of every slab class, in slab order. `limit` applies per slab.
pub fn keys(client: &dyn CacheClient, limit: usize) -> Result<Option<Vec<String>>> {
    let mut keys = Vec::new();
    for slab in slab_ids(client)? {
        if let Some(found) = keys_in_slab(client, slab, limit)? {
            keys.extend(found);
        }
    }
    Ok((!keys.is_empty()).then_some(keys))
}

/// Value of the first readable key, in `slab` or in any slab.
pub fn first_value(client: &dyn CacheClient, slab: Option<u32>) -> Result<Option<Item>> {
    let slabs = match slab {
        Some(slab) => vec![slab],
        None => slab_ids(client)?,
    };
    for slab in slabs {
        let Some(keys) = keys_in_slab(client, slab, 1)? else {
            continue;
        };
        for key in keys {
            // The dump may list keys that expired since.
            if let Some(item) = client.get(&key)? {
                return Ok(Some(item));
            }
        }
    }
    Ok(None)
}

pub fn value(client: &dyn CacheClient, key: &str, hash: Option<KeyHash>) -> Result<Option<Item>> {
    client.get(&lookup_key(key, hash))
}

/// `Ok(false)` when there was nothing to delete.
pub fn delete_key(client: &dyn CacheClient, key: &str, hash: Option<KeyHash>) -> Result<bool> {
    let key = lookup_key(key, hash);
    let deleted = client.delete(&key)?;
    info!(server = %client.identity(), key, deleted, "delete");
    Ok(deleted)
}

/// Runs the live monitor over every member of `pool` until `stop` fires.
pub fn run_top<D: Display>(
    pool: &ConnectionPool,
    config: &MonitorConfig,
    display: D,
    stop: &StopSignal,
) -> Result<()> {
    TopMonitor::new(pool.members(), config, display).run(stop)
}

fn slab_ids(client: &dyn CacheClient) -> Result<Vec<u32>> {
    let items = client.request("stats items")?;
    Ok(parse_slab_stats(&items, "").keys().copied().collect())
}

fn lookup_key(key: &str, hash: Option<KeyHash>) -> String {
    match hash {
        Some(hash) => {
            let hashed = hash.apply(key);
            debug!(key, hash = hash.name(), %hashed, "hashed key");
            hashed
        }
        None => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServerIdentity;
    use std::{collections::HashMap, sync::Mutex};

    /// Answers commands from a fixed table and records what it was sent.
    struct Scripted {
        identity: ServerIdentity,
        responses: HashMap<String, String>,
        values: HashMap<String, Vec<u8>>,
        sent: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                identity: ServerIdentity::new("fake", "11211"),
                responses: responses
                    .iter()
                    .map(|(c, r)| (c.to_string(), r.to_string()))
                    .collect(),
                values: HashMap::new(),
                sent: Mutex::default(),
            }
        }

        fn with_value(mut self, key: &str, value: &[u8]) -> Self {
            self.values.insert(key.to_string(), value.to_vec());
            self
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl CacheClient for Scripted {
        fn identity(&self) -> &ServerIdentity {
            &self.identity
        }

        fn request(&self, command: &str) -> Result<String> {
            self.sent.lock().unwrap().push(command.to_string());
            self.responses
                .get(command)
                .cloned()
                .ok_or_else(|| Error::Closed(self.identity.to_string()))
        }

        fn get(&self, key: &str) -> Result<Option<Item>> {
            self.sent.lock().unwrap().push(format!("get {key}"));
            Ok(self.values.get(key).map(|value| Item {
                key: key.to_string(),
                flags: 0,
                value: value.clone(),
            }))
        }

        fn delete(&self, key: &str) -> Result<bool> {
            self.sent.lock().unwrap().push(format!("delete {key}"));
            Ok(self.values.contains_key(key))
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    const ITEMS: &str = "STAT items:1:number 2\r\nSTAT items:4:number 1\r\nEND\r\n";

    #[test]
    fn empty_stats_are_not_found() {
        let client = Scripted::new(&[("stats", "END\r\n")]);
        assert_eq!(server_stats(&client).unwrap(), None);
    }

    #[test]
    fn stats_failure_is_an_error() {
        let client = Scripted::new(&[]);
        assert!(server_stats(&client).is_err());
    }

    #[test]
    fn empty_dump_differs_from_failure() {
        let client = Scripted::new(&[("stats cachedump 3 0", "END\r\n")]);
        assert_eq!(keys_in_slab(&client, 3, 0).unwrap(), None);
        assert!(keys_in_slab(&client, 4, 0).is_err());
    }

    #[test]
    fn keys_walk_every_slab() {
        let client = Scripted::new(&[
            ("stats items", ITEMS),
            ("stats cachedump 1 10", "ITEM a [1 b; 0 s]\r\nITEM b [1 b; 0 s]\r\nEND\r\n"),
            ("stats cachedump 4 10", "ITEM c [1 b; 0 s]\r\nEND\r\n"),
        ]);
        let found = keys(&client, 10).unwrap().unwrap();
        assert_eq!(found, vec!["a", "b", "c"]);
        assert_eq!(
            client.sent(),
            vec!["stats items", "stats cachedump 1 10", "stats cachedump 4 10"]
        );
    }

    #[test]
    fn first_value_skips_expired_keys() {
        let client = Scripted::new(&[
            ("stats items", ITEMS),
            ("stats cachedump 1 1", "ITEM gone [1 b; 0 s]\r\nEND\r\n"),
            ("stats cachedump 4 1", "ITEM live [1 b; 0 s]\r\nEND\r\n"),
        ])
        .with_value("live", b"hello");
        let item = first_value(&client, None).unwrap().unwrap();
        assert_eq!(item.key, "live");
        assert_eq!(item.value, b"hello");
    }

    #[test]
    fn hashed_lookups_use_the_digest() {
        let digest = KeyHash::Md5.apply("session");
        let client = Scripted::new(&[]).with_value(&digest, b"x");
        assert!(value(&client, "session", Some(KeyHash::Md5)).unwrap().is_some());
        assert!(value(&client, "session", None).unwrap().is_none());
        assert!(delete_key(&client, "session", Some(KeyHash::Md5)).unwrap());
        assert_eq!(client.sent().last().unwrap(), &format!("delete {digest}"));
    }

    #[test]
    fn disabled_histogram_reports_its_status() {
        let client = Scripted::new(&[("stats sizes", "STAT sizes_status disabled\r\nEND\r\n")]);
        let err = size_histogram(&client).unwrap_err();
        assert!(
            matches!(err, Error::Unavailable { ref status, .. } if status == "sizes_status disabled")
        );
        assert_eq!(
            err.to_string(),
            "size histogram unavailable on fake:11211: sizes_status disabled"
        );
    }

    #[test]
    fn empty_histogram_is_not_found() {
        let client = Scripted::new(&[("stats sizes", "END\r\n")]);
        assert_eq!(size_histogram(&client).unwrap(), None);
    }
}
