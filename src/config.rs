// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{defaults, OPERATOR_NAME};
use crate::error::{KeelError, Result};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Leader election settings. Accepted and reported only; no election is run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub lease_name: String,
    pub lease_namespace: String,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_name: defaults::LEADER_ELECTION_LEASE.to_string(),
            lease_namespace: defaults::LEADER_ELECTION_NAMESPACE.to_string(),
        }
    }
}

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Reconciliation workers per controller
    pub workers: usize,
    pub rate_limit_base: Duration,
    pub rate_limit_max: Duration,
    /// Pause before re-opening a dropped watch
    pub watch_reconnect: Duration,
    pub metrics_addr: SocketAddr,
    pub health_addr: SocketAddr,
    /// Webhook listener; no webhook server when unset
    pub webhook_addr: Option<SocketAddr>,
    pub event_reporter: String,
    pub leader_election: LeaderElectionConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let workers: usize = parse(&var, "CONTROLLER_WORKERS", defaults::WORKERS)?;
        if workers == 0 {
            return Err(KeelError::InvalidConfig(
                "CONTROLLER_WORKERS must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            watch_namespace: var("WATCH_NAMESPACE"),
            workers,
            rate_limit_base: Duration::from_millis(parse(
                &var,
                "RATE_LIMIT_BASE_MS",
                defaults::RATE_LIMIT_BASE_MS,
            )?),
            rate_limit_max: Duration::from_secs(parse(
                &var,
                "RATE_LIMIT_MAX_SECS",
                defaults::RATE_LIMIT_MAX_SECS,
            )?),
            watch_reconnect: Duration::from_secs(parse(
                &var,
                "WATCH_RECONNECT_SECS",
                defaults::WATCH_RECONNECT_SECS,
            )?),
            metrics_addr: parse_addr(&var, "METRICS_ADDR", defaults::METRICS_ADDR)?,
            health_addr: parse_addr(&var, "HEALTH_ADDR", defaults::HEALTH_ADDR)?,
            webhook_addr: var("WEBHOOK_ADDR")
                .map(|v| parse_value::<SocketAddr>("WEBHOOK_ADDR", &v))
                .transpose()?,
            event_reporter: var("EVENT_REPORTER").unwrap_or_else(|| OPERATOR_NAME.to_string()),
            leader_election: LeaderElectionConfig {
                enabled: parse(&var, "LEADER_ELECTION", false)?,
                lease_name: var("LEADER_ELECTION_LEASE")
                    .unwrap_or_else(|| defaults::LEADER_ELECTION_LEASE.to_string()),
                lease_namespace: var("LEADER_ELECTION_NAMESPACE")
                    .unwrap_or_else(|| defaults::LEADER_ELECTION_NAMESPACE.to_string()),
            },
        })
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| KeelError::InvalidConfig(format!("{}={:?}: {}", name, value, e)))
}

fn parse<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

fn parse_addr<F>(var: &F, name: &str, default: &str) -> Result<SocketAddr>
where
    F: Fn(&str) -> Option<String>,
{
    let value = var(name).unwrap_or_else(|| default.to_string());
    parse_value(name, &value)
}
