//! ## thawgun-telemetry::metrics
//! **Prometheus counters for the advance controller**

use prometheus::{Counter, Histogram, HistogramOpts, Registry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("Metric exposition is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub advances: Counter,
    pub deadlines_fired: Counter,
    pub cancelled_skipped: Counter,
    pub virtual_advanced_ns: Counter,
    pub drain_quanta: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let advances = Counter::new("thawgun_advances_total", "Completed advance calls")?;
        let deadlines_fired = Counter::new(
            "thawgun_deadlines_fired_total",
            "Delayed callbacks executed by deadline jumps",
        )?;
        let cancelled_skipped = Counter::new(
            "thawgun_cancelled_skipped_total",
            "Cancelled delayed callbacks skipped during advances",
        )?;
        let virtual_advanced_ns = Counter::new(
            "thawgun_virtual_advanced_ns_total",
            "Virtual nanoseconds moved forward by advances",
        )?;
        let drain_quanta = Histogram::with_opts(
            HistogramOpts::new(
                "thawgun_drain_quanta",
                "Scheduling quanta spent per drain before reaching a fixed point",
            )
            .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 64.0, 256.0, 1024.0]),
        )?;

        registry.register(Box::new(advances.clone()))?;
        registry.register(Box::new(deadlines_fired.clone()))?;
        registry.register(Box::new(cancelled_skipped.clone()))?;
        registry.register(Box::new(virtual_advanced_ns.clone()))?;
        registry.register(Box::new(drain_quanta.clone()))?;

        Ok(Self {
            registry,
            advances,
            deadlines_fired,
            cancelled_skipped,
            virtual_advanced_ns,
            drain_quanta,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn gather_metrics(&self) -> Result<String, MetricsError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_advance(&self, advanced_ns: u64) {
        self.advances.inc();
        self.virtual_advanced_ns.inc_by(advanced_ns as f64);
    }

    pub fn record_drain(&self, quanta: u32) {
        self.drain_quanta.observe(f64::from(quanta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.record_advance(1_500);
        metrics.deadlines_fired.inc();
        metrics.record_drain(3);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("thawgun_advances_total 1"));
        assert!(text.contains("thawgun_virtual_advanced_ns_total 1500"));
        assert!(text.contains("thawgun_deadlines_fired_total 1"));
        assert!(text.contains("thawgun_drain_quanta_count 1"));
    }

    #[test]
    fn recorders_do_not_share_registries() {
        let a = MetricsRecorder::new().unwrap();
        let b = MetricsRecorder::new().unwrap();
        a.record_advance(10);
        assert_eq!(a.advances.get(), 1.0);
        assert_eq!(b.advances.get(), 0.0);
    }
}
