use std::{
    fmt, io,
    io::{BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    str::FromStr,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use crate::error::{Error, Result};

pub const DEFAULT_PORT: &str = "11211";
const MAX_KEY_LEN: usize = 250;
/// Largest item a server can be configured to store (`-I 1024m`).
pub const MAX_VALUE_LEN: usize = 1024 * 1024 * 1024;

/// Lines that close a text-protocol response.
const TERMINATORS: [&str; 6] = ["END", "OK", "DELETED", "NOT_FOUND", "STORED", "RESET"];

/// `host:port` pair naming one server. Both parts are kept as given so the
/// canonical form matches what the operator typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerIdentity {
    host: String,
    port: String,
}

impl ServerIdentity {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerIdentity {
    type Err = Error;

    /// Parses `host[:port]`, falling back to [`DEFAULT_PORT`].
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s.split_once(':').unwrap_or((s, ""));
        if host.is_empty() {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        let port = if port.is_empty() { DEFAULT_PORT } else { port };
        if port.parse::<u16>().is_err() {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

/// A stored value as returned by `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub flags: u32,
    pub value: Vec<u8>,
}

/// Hash applied to a key before it is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyHash {
    Md5,
    Sha1,
}

impl KeyHash {
    pub fn apply(self, key: &str) -> String {
        match self {
            Self::Md5 => hex::encode(md5::Md5::digest(key.as_bytes())),
            Self::Sha1 => hex::encode(Sha1::digest(key.as_bytes())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
        }
    }
}

/// The operations the rest of the crate needs from a server.
pub trait CacheClient: Send + Sync {
    fn identity(&self) -> &ServerIdentity;

    /// Sends a raw command and returns the full textual response.
    fn request(&self, command: &str) -> Result<String>;

    fn get(&self, key: &str) -> Result<Option<Item>>;

    /// `Ok(false)` when the key did not exist.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Reports liveness, opening the transport if it is not open yet.
    fn is_connected(&self) -> bool;
}

/// One TCP connection to one server. Commands are serialised through the
/// inner mutex; the socket is opened lazily and dropped after a transport
/// failure so the next command reconnects.
#[derive(Debug)]
pub struct Connection {
    identity: ServerIdentity,
    timeout: Option<Duration>,
    stream: Mutex<Option<BufReader<TcpStream>>>,
}

impl Connection {
    pub fn new(identity: ServerIdentity, timeout: Option<Duration>) -> Self {
        Self {
            identity,
            timeout,
            stream: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<BufReader<TcpStream>> {
        let server = self.identity.to_string();
        let connect_error = |source| Error::Connect {
            server: server.clone(),
            source,
        };
        let mut last_error = None;
        for addr in server.to_socket_addrs().map_err(connect_error)? {
            let attempt = match self.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream
                        .set_read_timeout(self.timeout)
                        .and_then(|()| stream.set_write_timeout(self.timeout))
                        .and_then(|()| stream.set_nodelay(true))
                        .map_err(connect_error)?;
                    debug!(%server, %addr, "connected");
                    return Ok(BufReader::new(stream));
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(connect_error(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        })))
    }

    /// Writes `command` and lets `read` consume the answer. The stream is put
    /// back only if the exchange left it in a known state.
    fn exchange<T>(
        &self,
        command: &str,
        read: impl FnOnce(&ServerIdentity, &mut BufReader<TcpStream>) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        trace!(server = %self.identity, command, "sending");
        let outcome = send_line(&self.identity, stream.get_mut(), command)
            .and_then(|()| read(&self.identity, &mut stream));
        match &outcome {
            Err(err @ (Error::Protocol { .. } | Error::Connect { .. } | Error::Io { .. })) => {
                debug!(server = %self.identity, error = %err, "dropping connection");
            }
            Err(Error::Closed(_)) => debug!(server = %self.identity, "server closed connection"),
            _ => *slot = Some(stream),
        }
        outcome
    }
}

impl CacheClient for Connection {
    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    fn request(&self, command: &str) -> Result<String> {
        self.exchange(command, read_response)
    }

    fn get(&self, key: &str) -> Result<Option<Item>> {
        validate_key(key)?;
        self.exchange(&format!("get {key}"), |server, reader| {
            let header = read_line(server, reader)?;
            let header = header.trim_end();
            if header == "END" {
                return Ok(None);
            }
            check_error(server, header)?;
            let (flags, len) = parse_value_header(header)
                .filter(|&(_, len)| len <= MAX_VALUE_LEN)
                .ok_or_else(|| protocol(server, header))?;

            // Grows with what actually arrives instead of trusting the header.
            let block = len as u64 + 2;
            let mut data = Vec::new();
            Read::take(&mut *reader, block)
                .read_to_end(&mut data)
                .map_err(|source| io_error(server, source))?;
            if data.len() as u64 != block {
                return Err(Error::Closed(server.to_string()));
            }
            if !data.ends_with(b"\r\n") {
                return Err(protocol(server, "value block not terminated by CRLF"));
            }
            data.truncate(len);

            let end = read_line(server, reader)?;
            if end.trim_end() != "END" {
                return Err(protocol(server, end.trim_end()));
            }
            Ok(Some(Item {
                key: key.to_string(),
                flags,
                value: data,
            }))
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.exchange(&format!("delete {key}"), |server, reader| {
            let line = read_line(server, reader)?;
            match line.trim_end() {
                "DELETED" => Ok(true),
                "NOT_FOUND" => Ok(false),
                other => {
                    check_error(server, other)?;
                    Err(protocol(server, other))
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return true;
        }
        match self.connect() {
            Ok(stream) => {
                *slot = Some(stream);
                true
            }
            Err(err) => {
                debug!(error = %err, "probe failed");
                false
            }
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidKey(key.to_string()))
    }
}

fn send_line(server: &ServerIdentity, stream: &mut TcpStream, command: &str) -> Result<()> {
    stream
        .write_all(format!("{command}\r\n").as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|source| io_error(server, source))
}

fn read_line(server: &ServerIdentity, reader: &mut impl BufRead) -> Result<String> {
    let mut buf = Vec::new();
    let n = reader
        .read_until(b'\n', &mut buf)
        .map_err(|source| io_error(server, source))?;
    if n == 0 {
        return Err(Error::Closed(server.to_string()));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_response(server: &ServerIdentity, reader: &mut BufReader<TcpStream>) -> Result<String> {
    let mut response = String::new();
    loop {
        let line = read_line(server, reader)?;
        let trimmed = line.trim_end();
        check_error(server, trimmed)?;
        let done = TERMINATORS.contains(&trimmed) || trimmed.starts_with("VERSION ");
        response.push_str(&line);
        if done {
            return Ok(response);
        }
    }
}

fn check_error(server: &ServerIdentity, line: &str) -> Result<()> {
    if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        return Err(Error::Server {
            server: server.to_string(),
            message: line.to_string(),
        });
    }
    Ok(())
}

/// `VALUE <key> <flags> <bytes> [<cas>]`
fn parse_value_header(line: &str) -> Option<(u32, usize)> {
    let mut parts = line.strip_prefix("VALUE ")?.split_whitespace();
    let _key = parts.next()?;
    let flags = parts.next()?.parse().ok()?;
    let len = parts.next()?.parse().ok()?;
    Some((flags, len))
}

fn io_error(server: &ServerIdentity, source: io::Error) -> Error {
    Error::Io {
        server: server.to_string(),
        source,
    }
}

fn protocol(server: &ServerIdentity, detail: &str) -> Error {
    Error::Protocol {
        server: server.to_string(),
        detail: detail.to_string(),
    }
}
