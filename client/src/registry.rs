//! Registry of upstream routers discovered from inbound connections.
//!
//! Every inbound connection is a candidate router. Its remote address,
//! rewritten to the known router port, is probed with `version\r\n`; a peer
//! whose reply ends in the literal `mcrouter` joins the server list. Usage
//! counts track open connections per router, and a router whose usage drops
//! to zero leaves the list on the next rebuild.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use hotkey_engine::shard::fnv1a;

/// How long the identity probe may take end to end.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from registration and server selection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("malformed router address: {0}")]
    Address(String),
    #[error("{0} failed the router identity probe")]
    ProbeFailed(String),
    #[error("no routers registered")]
    NoServers,
}

#[derive(Default)]
struct Inner {
    /// Router address -> number of connections currently using it.
    routers: HashMap<String, i64>,
    /// Addresses with usage > 0, in selection order.
    servers: Vec<String>,
}

impl Inner {
    fn rebuild(&mut self) {
        let mut servers: Vec<String> = self
            .routers
            .iter()
            .filter(|(_, usage)| **usage > 0)
            .map(|(address, _)| address.clone())
            .collect();
        // Stable order keeps the key -> server mapping consistent across
        // rebuilds that do not change membership.
        servers.sort();
        self.servers = servers;
    }
}

/// The set of verified upstream routers.
pub struct RouterRegistry {
    router_port: u16,
    inner: Mutex<Inner>,
}

impl RouterRegistry {
    pub fn new(router_port: u16) -> Self {
        Self {
            router_port,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register the remote end of an inbound connection as a router.
    ///
    /// A known address just gains a usage count. A new one is probed first;
    /// rejection is not remembered, so the next connection from that host
    /// retries.
    pub async fn register(&self, remote: &str) -> Result<(), RegistryError> {
        let candidate = normalize(remote, self.router_port)?;

        {
            let mut inner = self.inner.lock();
            if let Some(usage) = inner.routers.get_mut(&candidate) {
                *usage += 1;
                inner.rebuild();
                return Ok(());
            }
        }

        // Probe outside the lock; the socket is local to this call.
        if !probe(&candidate).await {
            warn!(%candidate, "candidate failed the router identity probe");
            return Err(RegistryError::ProbeFailed(candidate));
        }

        info!(router = %candidate, "registered upstream router");
        let mut inner = self.inner.lock();
        *inner.routers.entry(candidate).or_insert(0) += 1;
        inner.rebuild();
        Ok(())
    }

    /// Release one usage of the router behind a closed connection.
    pub fn unregister(&self, remote: &str) -> Result<(), RegistryError> {
        let candidate = normalize(remote, self.router_port)?;
        let mut inner = self.inner.lock();
        if let Some(usage) = inner.routers.get_mut(&candidate) {
            *usage -= 1;
            inner.rebuild();
        }
        Ok(())
    }

    /// The router a key routes to.
    ///
    /// Keys hash onto the sorted server list with the same FNV-1a the
    /// engine shards by.
    pub fn pick_server(&self, key: &str) -> Result<String, RegistryError> {
        let inner = self.inner.lock();
        if inner.servers.is_empty() {
            return Err(RegistryError::NoServers);
        }
        let index = fnv1a(key.as_bytes()) as usize % inner.servers.len();
        Ok(inner.servers[index].clone())
    }

    /// Visit every active router.
    pub fn each(&self, mut visit: impl FnMut(&str)) {
        let inner = self.inner.lock();
        for server in &inner.servers {
            visit(server);
        }
    }

    /// The active router addresses.
    pub fn servers(&self) -> Vec<String> {
        self.inner.lock().servers.clone()
    }
}

/// Rewrite `host:port` to the configured router port.
fn normalize(remote: &str, router_port: u16) -> Result<String, RegistryError> {
    let malformed = || RegistryError::Address(remote.to_string());
    let (host, port) = remote.rsplit_once(':').ok_or_else(malformed)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(malformed());
    }
    Ok(format!("{host}:{router_port}"))
}

/// Ask the candidate for its version and accept it iff the reply ends with
/// the literal word `mcrouter`.
async fn probe(candidate: &str) -> bool {
    debug!(candidate, "probing candidate router");
    let attempt = async {
        let mut stream = TcpStream::connect(candidate).await?;
        stream.write_all(b"version\r\n").await?;
        let mut buf = [0u8; 128];
        let read = stream.read(&mut buf).await?;
        Ok::<bool, std::io::Error>(identifies_router(&buf[..read]))
    };
    matches!(tokio::time::timeout(PROBE_TIMEOUT, attempt).await, Ok(Ok(true)))
}

/// A probe reply like `VERSION 36.0.0-master mcrouter` identifies a router.
fn identifies_router(reply: &[u8]) -> bool {
    String::from_utf8_lossy(reply).trim().ends_with("mcrouter")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn normalize_substitutes_the_router_port() {
        assert_eq!(normalize("10.0.0.7:53124", 8989).unwrap(), "10.0.0.7:8989");
        assert_eq!(normalize("localhost:1", 8989).unwrap(), "localhost:8989");
    }

    #[test]
    fn normalize_rejects_garbage() {
        for remote in ["", "nocolon", ":1234", "host:", "host:notaport"] {
            assert!(matches!(
                normalize(remote, 8989),
                Err(RegistryError::Address(_))
            ));
        }
    }

    #[test]
    fn identifies_router_replies() {
        assert!(identifies_router(b"VERSION 36.0.0-master mcrouter\r\n"));
        assert!(!identifies_router(b"VERSION 1.6.21\r\n"));
        assert!(!identifies_router(b""));
    }

    async fn fake_router() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Answer every probe connection with a canned version reply.
    async fn answer_probes(listener: TcpListener, reply: &'static [u8]) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(reply).await;
        }
    }

    #[tokio::test]
    async fn empty_registry_has_no_servers() {
        let registry = RouterRegistry::new(8989);
        assert_eq!(
            registry.pick_server("some key"),
            Err(RegistryError::NoServers)
        );
    }

    #[tokio::test]
    async fn rejects_candidates_that_fail_the_probe() {
        let (listener, port) = fake_router().await;
        tokio::spawn(answer_probes(listener, b"VERSION 1.6.21\r\n"));

        let registry = RouterRegistry::new(port);
        assert!(matches!(
            registry.register("127.0.0.1:50000").await,
            Err(RegistryError::ProbeFailed(_))
        ));
        assert_eq!(
            registry.pick_server("anything"),
            Err(RegistryError::NoServers)
        );
    }

    #[tokio::test]
    async fn rejects_unreachable_candidates() {
        // Grab a port and close it again so nothing is listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let registry = RouterRegistry::new(port);
        assert!(registry.register("127.0.0.1:50000").await.is_err());
    }

    #[tokio::test]
    async fn accepts_verified_routers() {
        let (listener, port) = fake_router().await;
        tokio::spawn(answer_probes(listener, b"VERSION 36.0.0-master mcrouter\r\n"));

        let registry = RouterRegistry::new(port);
        registry.register("127.0.0.1:50000").await.unwrap();

        let picked = registry.pick_server("anything").unwrap();
        assert_eq!(picked, format!("127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn usage_counts_gate_the_server_list() {
        let (listener, port) = fake_router().await;
        tokio::spawn(answer_probes(listener, b"VERSION 36.0.0-master mcrouter\r\n"));

        let registry = RouterRegistry::new(port);
        // Two connections from the same host; only the first probes.
        registry.register("127.0.0.1:50000").await.unwrap();
        registry.register("127.0.0.1:50001").await.unwrap();
        assert_eq!(registry.servers().len(), 1);

        registry.unregister("127.0.0.1:50000").unwrap();
        assert_eq!(registry.servers().len(), 1);

        registry.unregister("127.0.0.1:50001").unwrap();
        assert!(registry.servers().is_empty());
        assert_eq!(
            registry.pick_server("anything"),
            Err(RegistryError::NoServers)
        );
    }
}
