//! Upgrade metrics and tracing spans
//!
//! With the `metrics` feature, script executions and module failures are
//! counted through OpenTelemetry and exported in Prometheus text format by
//! [`render`]. With the `tracing` feature, module upgrades and script runs are
//! wrapped in spans.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::*;

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Registry, TextEncoder};
    use std::time::Duration;

    /// `None` if the exporter could not be built; recording is then a no-op
    pub static METRICS: Lazy<Option<GuardMetrics>> = Lazy::new(|| match GuardMetrics::init() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            log::warn!("Metrics disabled: {}", e);
            None
        }
    });

    pub struct GuardMetrics {
        pub registry: Registry,
        pub scripts_applied: Counter<u64>,
        pub script_duration: Histogram<f64>,
        pub module_failures: Counter<u64>,
        _provider: SdkMeterProvider,
    }

    impl GuardMetrics {
        pub fn init() -> Result<Self, String> {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .map_err(|e| format!("failed to build prometheus exporter: {e}"))?;
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("moduleguard");

            let scripts_applied = meter
                .u64_counter("moduleguard_scripts_applied_total")
                .with_description("SQL upgrade scripts applied")
                .build();

            let script_duration = meter
                .f64_histogram("moduleguard_script_duration_seconds")
                .with_description("Duration of SQL upgrade scripts")
                .build();

            let module_failures = meter
                .u64_counter("moduleguard_module_upgrade_failures_total")
                .with_description("Modules whose upgrade or initialization failed")
                .build();

            Ok(Self {
                registry,
                scripts_applied,
                script_duration,
                module_failures,
                _provider: provider,
            })
        }

        pub fn record_script(&self, module: &str, elapsed: Duration) {
            let attrs = [KeyValue::new("module", module.to_string())];
            self.scripts_applied.add(1, &attrs);
            self.script_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_module_failure(&self, module: &str) {
            self.module_failures
                .add(1, &[KeyValue::new("module", module.to_string())]);
        }
    }

    pub fn record_script(module: &str, elapsed: Duration) {
        if let Some(metrics) = METRICS.as_ref() {
            metrics.record_script(module, elapsed);
        }
    }

    pub fn record_module_failure(module: &str) {
        if let Some(metrics) = METRICS.as_ref() {
            metrics.record_module_failure(module);
        }
    }

    /// Prometheus text exposition of every upgrade metric
    pub fn render() -> String {
        let Some(metrics) = METRICS.as_ref() else {
            return String::new();
        };
        TextEncoder::new()
            .encode_to_string(&metrics.registry.gather())
            .unwrap_or_else(|e| {
                log::warn!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    pub fn module_upgrade_span(module: &str) -> Span {
        tracing::info_span!("module_upgrade", module = %module)
    }

    pub fn run_script_span(module: &str, script: &str) -> Span {
        tracing::info_span!("run_script", module = %module, script = %script)
    }
}
