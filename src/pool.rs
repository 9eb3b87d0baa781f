use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    connection::{CacheClient, Connection, ServerIdentity},
    error::{Error, Result},
};

/// Hands out one shared [`Connection`] per `host:port`. Connections are
/// created on first request and live as long as the pool.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    timeout: Option<Duration>,
    connections: Mutex<IndexMap<ServerIdentity, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            connections: Mutex::default(),
        }
    }

    pub fn get(&self, identity: &ServerIdentity) -> Arc<Connection> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connections
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(server = %identity, "new pool member");
                Arc::new(Connection::new(identity.clone(), self.timeout))
            })
            .clone()
    }

    /// Registers every server of a `host[:port],...` list and returns the
    /// distinct connections in list order.
    pub fn extend_from_spec(&self, spec: &str) -> Result<Vec<Arc<Connection>>> {
        Ok(parse_pool(spec)?
            .iter()
            .map(|identity| self.get(identity))
            .collect())
    }

    /// Every connection handed out so far, oldest first.
    pub fn members(&self) -> Vec<Arc<dyn CacheClient>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|conn| Arc::clone(conn) as Arc<dyn CacheClient>)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `host[:port],host[:port],...`, dropping blanks and duplicates.
pub fn parse_pool(spec: &str) -> Result<Vec<ServerIdentity>> {
    let mut seen = IndexMap::new();
    for entry in spec.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let identity: ServerIdentity = entry.parse()?;
        seen.entry(identity.to_string()).or_insert(identity);
    }
    if seen.is_empty() {
        return Err(Error::EmptyPool);
    }
    Ok(seen.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_identity_same_connection() {
        let pool = ConnectionPool::new(None);
        let id = ServerIdentity::new("cache-1", "11211");
        let a = pool.get(&id);
        let b = pool.get(&ServerIdentity::new("cache-1", "11211"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn spec_collapses_duplicates() {
        let ids = parse_pool("a, b:11212,,a:11211 ,b:11212").unwrap();
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a:11211", "b:11212"]);
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert!(matches!(parse_pool(""), Err(Error::EmptyPool)));
        assert!(matches!(parse_pool(" , ,"), Err(Error::EmptyPool)));
        assert!(matches!(parse_pool(":11211"), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn members_follow_insertion_order() {
        let pool = ConnectionPool::new(None);
        let conns = pool.extend_from_spec("b,a,b").unwrap();
        assert_eq!(conns.len(), 2);
        pool.get(&ServerIdentity::new("a", "11211"));

        let members: Vec<String> = pool
            .members()
            .iter()
            .map(|client| client.identity().to_string())
            .collect();
        assert_eq!(members, vec!["b:11211", "a:11211"]);
    }
}
