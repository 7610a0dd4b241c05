//! Prometheus registry for run outcomes and pool pressure.
use aps_core::PoolStats;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    runs_started: IntCounterVec,
    runs_succeeded: IntCounterVec,
    runs_failed: IntCounterVec,
    contexts_checked_out: IntGauge,
    contexts_created: IntGauge,
}

fn run_counter(name: &str, help: &str) -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(Opts::new(name, help), &["kind"])
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = Self {
            runs_started: run_counter("aps_runs_started_total", "Pipeline runs started")?,
            runs_succeeded: run_counter("aps_runs_succeeded_total", "Pipeline runs that produced a determination")?,
            runs_failed: run_counter("aps_runs_failed_total", "Pipeline runs that failed")?,
            contexts_checked_out: IntGauge::new("aps_contexts_checked_out", "Script contexts currently in use")?,
            contexts_created: IntGauge::new("aps_contexts_created", "Script contexts created so far")?,
            registry,
        };
        metrics.registry.register(Box::new(metrics.runs_started.clone()))?;
        metrics.registry.register(Box::new(metrics.runs_succeeded.clone()))?;
        metrics.registry.register(Box::new(metrics.runs_failed.clone()))?;
        metrics.registry.register(Box::new(metrics.contexts_checked_out.clone()))?;
        metrics.registry.register(Box::new(metrics.contexts_created.clone()))?;
        Ok(metrics)
    }

    pub fn run_started(&self, kind: &str) {
        self.runs_started.with_label_values(&[kind]).inc();
    }

    pub fn run_finished<T, E>(&self, kind: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.runs_succeeded.with_label_values(&[kind]).inc(),
            Err(_) => self.runs_failed.with_label_values(&[kind]).inc(),
        }
    }

    pub fn observe_pool(&self, stats: &PoolStats) {
        self.contexts_checked_out.set(stats.checked_out as i64);
        self.contexts_created.set(stats.created as i64);
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        encode(&self.registry)
    }
}

pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_by_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.run_started("simulate");
        metrics.run_finished::<(), ()>("simulate", &Ok(()));
        metrics.run_finished::<(), ()>("determine", &Err(()));

        let text = metrics.encode().unwrap();
        assert!(text.contains("aps_runs_started_total{kind=\"simulate\"} 1"));
        assert!(text.contains("aps_runs_succeeded_total{kind=\"simulate\"} 1"));
        assert!(text.contains("aps_runs_failed_total{kind=\"determine\"} 1"));
    }
}
