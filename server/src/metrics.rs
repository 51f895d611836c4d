//! Eavesdropper metrics.

use metriken::{Counter, Gauge, metric};

// Connection metrics
#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

// Command counters
#[metric(name = "commands_fetch", description = "Total fetch-family commands")]
pub static FETCHES: Counter = Counter::new();

#[metric(name = "commands_store", description = "Total store-family commands")]
pub static STORES: Counter = Counter::new();

#[metric(name = "commands_delete", description = "Total DELETE commands")]
pub static DELETES: Counter = Counter::new();

#[metric(name = "protocol_errors", description = "Total protocol parse errors")]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

// Reporting
#[metric(name = "reports_published", description = "Top-N reports published upstream")]
pub static REPORTS_PUBLISHED: Counter = Counter::new();

#[metric(name = "report_errors", description = "Failed report publishes")]
pub static REPORT_ERRORS: Counter = Counter::new();

#[metric(name = "aggregations", description = "Aggregation cycles run while leader")]
pub static AGGREGATIONS: Counter = Counter::new();

#[metric(name = "aggregation_errors", description = "Failed aggregation cycles")]
pub static AGGREGATION_ERRORS: Counter = Counter::new();
