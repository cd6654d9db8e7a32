// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name, used as field manager and event reporter
pub const OPERATOR_NAME: &str = "keel";

/// Finalizer the demo Widget controller places on every Widget
pub const WIDGET_FINALIZER: &str = "example.com/f";

/// Admission path of the Widget validating webhook
pub const WIDGET_VALIDATE_PATH: &str = "/validate-widget";

/// Configuration defaults
pub mod defaults {
    pub const WORKERS: usize = 2;
    pub const RATE_LIMIT_BASE_MS: u64 = 5;
    pub const RATE_LIMIT_MAX_SECS: u64 = 1000;
    pub const WATCH_RECONNECT_SECS: u64 = 5;
    pub const METRICS_ADDR: &str = "0.0.0.0:8080";
    pub const HEALTH_ADDR: &str = "0.0.0.0:8081";
    pub const LEADER_ELECTION_LEASE: &str = "keel-leader";
    pub const LEADER_ELECTION_NAMESPACE: &str = "default";
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
