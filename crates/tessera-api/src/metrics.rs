//! Metric descriptions for the node.
//!
//! Metrics are recorded where they happen through the `metrics` facade.
//! This module only registers their help text with the installed recorder.

use metrics::{describe_counter, describe_gauge, Unit};

/// Describe all node metrics.
pub fn init_metrics() {
    // Recovery
    describe_counter!(
        "tessera_recovery_attempts_total",
        "Resume attempts made for an interrupted rebalance"
    );
    describe_counter!(
        "tessera_recovery_resolved_total",
        "Interrupted rebalances completed by the donor"
    );
    describe_counter!(
        "tessera_recovery_forced_total",
        "Interrupted rebalances abandoned by forcing normal state"
    );

    // Task runner
    describe_counter!("tessera_tasks_submitted_total", "Tasks submitted to the async runner");
    describe_counter!("tessera_tasks_completed_total", "Tasks finished, by outcome");
    describe_gauge!("tessera_tasks_running", Unit::Count, "Tasks currently executing");

    // Lifecycle
    describe_gauge!("tessera_services_started", Unit::Count, "Services currently started");
}
