//! Driver operation metrics

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;

/// Counters and latencies of driver operations
#[derive(Clone)]
pub struct DriverMetrics {
    operations: IntCounterVec,
    durations: HistogramVec,
}

impl DriverMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "san_driver_operations_total",
                "Driver operations by outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "san_driver_operation_duration_seconds",
                "Duration of driver operations",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(durations.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            operations,
            durations,
        })
    }

    /// Record one finished operation
    pub fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) if e.is_validation() => "rejected",
            Err(_) => "failure",
        };
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.durations
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}
