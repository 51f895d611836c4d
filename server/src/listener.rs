//! Acceptor glue.
//!
//! Accepts inbound proxy connections, registers each remote as a candidate
//! router, and runs one protocol session per connection. Unregistration runs
//! exactly once per accepted connection, whether or not registration or the
//! session succeeded.

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use guardian_client::RouterRegistry;

use crate::metrics::{CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE};
use crate::session::{self, Eavesdropper};

/// Accept connections forever.
pub async fn run(
    listener: TcpListener,
    eavesdropper: Arc<Eavesdropper>,
    registry: Arc<RouterRegistry>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                CONNECTIONS_ACCEPTED.increment();
                CONNECTIONS_ACTIVE.increment();
                info!(remote = %address, "accepted connection");

                let eavesdropper = eavesdropper.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    let remote = address.to_string();
                    if let Err(error) = registry.register(&remote).await {
                        debug!(%remote, %error, "connection peer is not a router");
                    }

                    if let Err(error) = session::serve(stream, eavesdropper).await
                        && !is_connection_reset(&error)
                    {
                        warn!(%remote, %error, "session error");
                    }

                    let _ = registry.unregister(&remote);
                    CONNECTIONS_ACTIVE.decrement();
                });
            }
            Err(error) => {
                warn!(%error, "error accepting connection");
            }
        }
    }
}

fn is_connection_reset(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
