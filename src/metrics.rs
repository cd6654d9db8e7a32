// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation metrics, exported in Prometheus text format on the metrics endpoint.

use crate::error::{KeelError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const RECONCILIATIONS_TOTAL: &str = "keel_reconciliations_total";
pub const RECONCILIATION_ERRORS_TOTAL: &str = "keel_reconciliation_errors_total";
pub const RECONCILIATION_DURATION_SECONDS: &str = "keel_reconciliation_duration_seconds";

/// Per-controller handles, labelled with the controller name.
#[derive(Clone)]
pub struct ControllerMetrics {
    pub reconciliations: ::metrics::Counter,
    pub errors: ::metrics::Counter,
    pub duration: ::metrics::Histogram,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        let label = controller.to_string();
        Self {
            reconciliations: ::metrics::counter!(RECONCILIATIONS_TOTAL, "controller" => label.clone()),
            errors: ::metrics::counter!(RECONCILIATION_ERRORS_TOTAL, "controller" => label.clone()),
            duration: ::metrics::histogram!(RECONCILIATION_DURATION_SECONDS, "controller" => label),
        }
    }

    pub fn observe(&self, elapsed: Duration, ok: bool) {
        self.reconciliations.increment(1);
        if !ok {
            self.errors.increment(1);
        }
        self.duration.record(elapsed.as_secs_f64());
    }
}

/// Installs the process-wide Prometheus recorder. Call once, before any controller
/// is constructed; handles created earlier are no-ops.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| KeelError::Server(format!("failed to install Prometheus recorder: {}", e)))
}
