//! Client for the memcached text protocol and a live, top-style monitor
//! built on it.

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod output;
pub mod parser;
pub mod pool;
pub mod rates;
pub mod slabs;
pub mod top;

pub use connection::{CacheClient, Connection, Item, KeyHash, ServerIdentity};
pub use error::{Error, Result};
pub use pool::ConnectionPool;
