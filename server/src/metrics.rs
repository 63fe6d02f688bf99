//! Server metrics.

use metriken::{Counter, Gauge, metric};

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

#[metric(
    name = "connections_idle_closed",
    description = "Connections closed by the idle timeout"
)]
pub static IDLE_TIMEOUTS: Counter = Counter::new();

#[metric(name = "requests", description = "Total requests executed")]
pub static REQUESTS: Counter = Counter::new();

#[metric(name = "requests_get", description = "Total GET commands")]
pub static GETS: Counter = Counter::new();

#[metric(name = "requests_set", description = "Total SET commands")]
pub static SETS: Counter = Counter::new();

#[metric(name = "requests_del", description = "Total DEL commands")]
pub static DELETES: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Total protocol parse errors"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

#[metric(name = "keys_expired", description = "Total keys removed by TTL expiry")]
pub static KEYS_EXPIRED: Counter = Counter::new();
