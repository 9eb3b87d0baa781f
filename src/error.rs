use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The server could not be reached at all.
    #[error("could not connect to {server}: {source}")]
    Connect {
        server: String,
        #[source]
        source: io::Error,
    },

    /// The transport failed after the connection was established.
    #[error("i/o error talking to {server}: {source}")]
    Io {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {0} closed by server")]
    Closed(String),

    /// `ERROR`, `CLIENT_ERROR` or `SERVER_ERROR` answer to a command.
    #[error("{server} rejected command: {message}")]
    Server { server: String, message: String },

    /// The server answered but reported the data as unavailable, such as
    /// `STAT sizes_status disabled`.
    #[error("{what} unavailable on {server}: {status}")]
    Unavailable {
        server: String,
        what: &'static str,
        status: String,
    },

    #[error("malformed response from {server}: {detail}")]
    Protocol { server: String, detail: String },

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    #[error("invalid server address {0:?}")]
    InvalidAddress(String),

    #[error("pool cannot be empty")]
    EmptyPool,

    #[error("could not encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
}

impl Error {
    /// True for failures that mean "this server is down" rather than a
    /// problem with the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io { .. } | Self::Closed(_)
        )
    }
}
