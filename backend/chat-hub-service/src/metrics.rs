//! Prometheus metrics for the connection hub
//!
//! Tracks live connections, fan-out volume, slow-consumer drops and producer failures

use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static::lazy_static! {
    /// Registered connections by scope (conversation/user)
    static ref HUB_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "chat_hub_connections",
        "Connections currently registered in the hub by scope",
        &["scope"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Broadcast operations by audience (conversation/user)
    static ref HUB_BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_hub_broadcasts_total",
        "Broadcast operations processed by the hub",
        &["audience"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Payloads queued onto outbound queues
    static ref HUB_DELIVERIES_TOTAL: IntCounter = register_int_counter!(
        "chat_hub_deliveries_total",
        "Payloads queued onto connection outbound queues"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Connections dropped because their queue was full or closed
    static ref HUB_SLOW_CONSUMER_DROPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_hub_slow_consumer_drops_total",
        "Connections removed during broadcast by reason",
        &["reason"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Inbound client actions by kind
    static ref INBOUND_ACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_hub_inbound_actions_total",
        "Inbound client actions decoded by the read-loop",
        &["action"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Producer failures (persistence, lookup) by action
    static ref PRODUCER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_hub_producer_failures_total",
        "Events dropped because persistence or lookup failed",
        &["action"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub fn connection_registered(scope: &str) {
    HUB_CONNECTIONS.with_label_values(&[scope]).inc();
}

pub fn connection_unregistered(scope: &str) {
    HUB_CONNECTIONS.with_label_values(&[scope]).dec();
}

pub fn record_broadcast(audience: &str, delivered: usize) {
    HUB_BROADCASTS_TOTAL.with_label_values(&[audience]).inc();
    HUB_DELIVERIES_TOTAL.inc_by(delivered as u64);
}

pub fn record_slow_consumer_drop(reason: &str) {
    HUB_SLOW_CONSUMER_DROPS_TOTAL
        .with_label_values(&[reason])
        .inc();
}

pub fn record_inbound_action(action: &str) {
    INBOUND_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn record_producer_failure(action: &str) {
    PRODUCER_FAILURES_TOTAL.with_label_values(&[action]).inc();
}

/// Encode every registered collector in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
