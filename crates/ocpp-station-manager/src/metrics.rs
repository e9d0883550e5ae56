//! Prometheus metrics for device commands and smart charging

use crate::config::MetricsConfig;
use crate::CsmsResult;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;
use tracing::info;

/// Metrics registry for the station manager
pub struct MetricsRegistry {
    registry: Registry,
    enabled: bool,
    namespace: String,
    commands_sent: IntCounterVec,
    command_failures: IntCounterVec,
    command_duration: HistogramVec,
    recomputations: IntCounterVec,
}

impl MetricsRegistry {
    /// Create new metrics registry
    pub fn new(config: &MetricsConfig) -> CsmsResult<Self> {
        if !config.enabled {
            info!("Metrics collection disabled");
        } else {
            info!("Initializing metrics with namespace: {}", config.namespace);
        }

        // An empty namespace is only tolerated when metrics are off
        let namespace = if config.namespace.is_empty() {
            "ocpp_station_manager".to_string()
        } else {
            config.namespace.clone()
        };

        let commands_sent = IntCounterVec::new(
            Opts::new(
                format!("{}_commands_sent_total", namespace),
                "Commands sent to charging stations",
            ),
            &["action"],
        )?;
        let command_failures = IntCounterVec::new(
            Opts::new(
                format!("{}_command_failures_total", namespace),
                "Commands rejected by or failed on charging stations",
            ),
            &["action", "outcome"],
        )?;
        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_command_duration_seconds", namespace),
                "Round trip time of charging station commands",
            )
            .buckets(config.latency_buckets.clone()),
            &["action"],
        )?;
        let recomputations = IntCounterVec::new(
            Opts::new(
                format!("{}_smart_charging_recomputations_total", namespace),
                "Site area charging profile recomputations",
            ),
            &["outcome"],
        )?;

        let registry = Registry::new();
        if config.enabled {
            registry.register(Box::new(commands_sent.clone()))?;
            registry.register(Box::new(command_failures.clone()))?;
            registry.register(Box::new(command_duration.clone()))?;
            registry.register(Box::new(recomputations.clone()))?;
        }

        Ok(Self {
            registry,
            enabled: config.enabled,
            namespace,
            commands_sent,
            command_failures,
            command_duration,
            recomputations,
        })
    }

    /// Registry that records nothing
    pub fn disabled() -> CsmsResult<Self> {
        Self::new(&MetricsConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn record_command_sent(&self, action: &str, duration: Duration) {
        if self.enabled {
            self.commands_sent.with_label_values(&[action]).inc();
            self.command_duration
                .with_label_values(&[action])
                .observe(duration.as_secs_f64());
        }
    }

    /// Record a command the station answered with a non accepted status
    pub fn record_command_rejected(&self, action: &str) {
        if self.enabled {
            self.command_failures
                .with_label_values(&[action, "rejected"])
                .inc();
        }
    }

    /// Record a command that got no usable answer
    pub fn record_command_error(&self, action: &str) {
        if self.enabled {
            self.command_failures
                .with_label_values(&[action, "error"])
                .inc();
        }
    }

    pub fn record_recomputation(&self, outcome: &str) {
        if self.enabled {
            self.recomputations.with_label_values(&[outcome]).inc();
        }
    }

    /// Get metrics in Prometheus format
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        if self.enabled {
            self.registry.gather()
        } else {
            Vec::new()
        }
    }

    /// Get metrics statistics
    pub fn get_stats(&self) -> MetricsStats {
        MetricsStats {
            enabled: self.enabled,
            metrics_count: self.gather().len(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Metrics statistics
#[derive(Debug, Clone)]
pub struct MetricsStats {
    /// Whether metrics are enabled
    pub enabled: bool,
    /// Number of metric families with samples
    pub metrics_count: usize,
    /// Metrics namespace
    pub namespace: String,
}
