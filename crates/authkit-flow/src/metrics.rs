//! Flow metrics
//!
//! - `authkit_flows_total` (counter): labels `variant`, `outcome`
//! - `authkit_flow_errors_total` (counter): labels `variant`, `kind`
//!
//! The host installs a recorder if it wants these; without one the calls are
//! no-ops.

/// Record a flow reaching a terminal state.
pub fn record_flow(variant: &str, outcome: &str) {
    metrics::counter!(
        "authkit_flows_total",
        "variant" => variant.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a failed flow with its error label.
pub fn record_flow_error(variant: &str, kind: &str) {
    metrics::counter!(
        "authkit_flow_errors_total",
        "variant" => variant.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}
