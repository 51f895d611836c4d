//! mc-guardian: a transparent eavesdropper on memcached routing tiers.
//!
//! Routers duplicate their GET/SET/ADD/DELETE traffic to this server. The
//! protocol sessions feed the hot-key engine, a 1-Hz reporter publishes each
//! instance's top-N back into the cache, and a leader-elected aggregator
//! merges the per-reporter views into a cluster-wide list.

pub mod aggregator;
pub mod config;
pub mod coordination;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod reporter;
pub mod secrets;
pub mod session;

pub use config::Options;
