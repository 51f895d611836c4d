//! Coordination service contract.
//!
//! The aggregator needs exactly two capabilities from its coordination
//! backend: a blocking named lock whose loss is observable, and a stale-read
//! health query over a service catalog. Building the real catalog client is
//! an external concern; [`SoloCoordination`] covers single-node deployments
//! and tests script their own implementations.

use std::future::Future;

use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("leadership election failed: {0}")]
    Election(String),
    #[error("service discovery failed: {0}")]
    Discovery(String),
}

/// Held leadership over a named lock.
///
/// The backend closes the embedded channel when leadership is revoked.
pub struct LeadershipLease {
    lost: oneshot::Receiver<()>,
    _held: Option<oneshot::Sender<()>>,
}

impl LeadershipLease {
    /// A lease paired with the sender whose drop (or send) revokes it.
    pub fn revocable() -> (Self, oneshot::Sender<()>) {
        let (revoke, lost) = oneshot::channel();
        (Self { lost, _held: None }, revoke)
    }

    /// A lease that is never revoked.
    pub fn permanent() -> Self {
        let (held, lost) = oneshot::channel();
        Self {
            lost,
            _held: Some(held),
        }
    }

    /// Whether leadership has been revoked.
    pub fn is_lost(&mut self) -> bool {
        !matches!(
            self.lost.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// A key-value lock service with service health queries.
pub trait Coordination: Send + Sync + 'static {
    /// Block until the named lock is acquired, returning the lease.
    fn acquire_lock(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<LeadershipLease, CoordinationError>> + Send;

    /// Addresses of the healthy instances of `service`. Stale reads are
    /// acceptable.
    fn healthy_instances(
        &self,
        service: &str,
    ) -> impl Future<Output = Result<Vec<String>, CoordinationError>> + Send;
}

/// Coordination for a deployment of one.
///
/// Leadership is granted immediately and never revoked; the healthy set is
/// this instance alone.
pub struct SoloCoordination {
    identity: String,
}

impl SoloCoordination {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl Coordination for SoloCoordination {
    async fn acquire_lock(&self, _key: &str) -> Result<LeadershipLease, CoordinationError> {
        Ok(LeadershipLease::permanent())
    }

    async fn healthy_instances(&self, _service: &str) -> Result<Vec<String>, CoordinationError> {
        Ok(vec![self.identity.clone()])
    }
}
