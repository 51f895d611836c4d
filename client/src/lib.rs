//! Memcached text client routed through the discovered upstream routers.
//!
//! The reporter and aggregator speak two operations upstream: SET for
//! publishing reports and multi-GET for collecting peer reports. Keys route
//! to routers through the [`RouterRegistry`]; one short-lived connection is
//! opened per operation, so no lock is ever held across network I/O.

mod registry;

pub use registry::{RegistryError, RouterRegistry};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use protocol_memcache::request::Request;
use protocol_memcache::response::ResponseLine;

/// Errors from upstream cache operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Protocol(#[from] protocol_memcache::ParseError),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// A cache client that picks its server per key from the router registry.
#[derive(Clone)]
pub struct CacheClient {
    registry: Arc<RouterRegistry>,
}

impl CacheClient {
    pub fn new(registry: Arc<RouterRegistry>) -> Self {
        Self { registry }
    }

    /// Store `value` under `key` on the router the key routes to.
    pub async fn set(&self, key: &str, value: &[u8]) -> Result<(), ClientError> {
        let server = self.registry.pick_server(key)?;
        let mut stream = TcpStream::connect(&server).await?;

        let mut buf = Vec::with_capacity(key.len() + value.len() + 32);
        Request::set(key, value).encode(&mut buf);
        stream.write_all(&buf).await?;

        let mut reader = BufReader::new(stream);
        let line = read_line(&mut reader).await?;
        match ResponseLine::parse(&line)? {
            ResponseLine::Stored => Ok(()),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Fetch every reachable key.
    ///
    /// Keys are grouped per router and fetched with one multi-GET each.
    /// Routers that cannot be reached are skipped; their keys are simply
    /// absent from the result.
    pub async fn get_multi(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        let mut by_server: HashMap<String, Vec<&str>> = HashMap::new();
        for key in keys {
            by_server
                .entry(self.registry.pick_server(key)?)
                .or_default()
                .push(key);
        }

        let mut values = HashMap::new();
        for (server, keys) in by_server {
            match fetch_from(&server, &keys).await {
                Ok(found) => values.extend(found),
                Err(error) => {
                    debug!(%server, %error, "skipping unreachable router");
                }
            }
        }
        Ok(values)
    }
}

/// Run one multi-GET against a single server.
async fn fetch_from(server: &str, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>, ClientError> {
    let mut stream = TcpStream::connect(server).await?;

    let mut buf = Vec::new();
    Request::get(keys).encode(&mut buf);
    stream.write_all(&buf).await?;

    let mut reader = BufReader::new(stream);
    let mut values = HashMap::new();
    loop {
        let line = read_line(&mut reader).await?;
        match ResponseLine::parse(&line)? {
            ResponseLine::Value(header) => {
                let mut value = vec![0u8; header.bytes];
                reader.read_exact(&mut value).await?;
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).await?;
                values.insert(header.key, value);
            }
            ResponseLine::End => return Ok(values),
            other => return Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

/// Read one CRLF-terminated line, stripped of its terminator.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, ClientError> {
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    while line.last().is_some_and(|byte| matches!(byte, b'\r' | b'\n')) {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidData).into())
}
