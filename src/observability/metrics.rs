// Pipeline metrics
//
// Counters, gauges and histograms for:
// - Job outcomes (succeeded, failed, partially failed)
// - Stage outcomes and stage latency
// - Cache hits, coalesced submissions, misses and evictions
// - Sandbox invocations, faults and limit violations
// - Scratch directory cleanup outcomes

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{JobStatus, ResourceExceeded, StageOutcome};

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    pub fn with_bounds(bounds: &[f64]) -> Self {
        Self {
            buckets: bounds
                .iter()
                .map(|&le| HistogramBucket {
                    le,
                    count: AtomicU64::new(0),
                })
                .collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets suited to toolchain invocations (10ms .. 60s)
    pub fn new_stage_latency() -> Self {
        Self::with_bounds(&[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, help: &str, output: &mut String) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for bucket in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n{}_sum {}\n{}_count {}\n",
            name,
            self.get_count(),
            name,
            self.get_sum_micros() as f64 / 1_000_000.0,
            name,
            self.get_count()
        ));
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    pub jobs_submitted: Counter,
    pub jobs_succeeded: Counter,
    pub jobs_failed: Counter,
    pub jobs_partially_failed: Counter,
    pub jobs_rejected: Counter,
    pub active_jobs: Gauge,

    pub stages_completed: Counter,
    pub stages_failed: Counter,
    pub stages_skipped: Counter,
    pub stage_parse_failures: Counter,

    pub cache_hits: Counter,
    pub cache_coalesced: Counter,
    pub cache_misses: Counter,
    pub cache_evictions: Counter,

    pub sandbox_invocations: Counter,
    pub sandbox_faults: Counter,
    pub limit_violations_cpu: Counter,
    pub limit_violations_memory: Counter,
    pub limit_violations_wall: Counter,
    pub limit_violations_output: Counter,

    pub cleanup_success: Counter,
    pub cleanup_failure: Counter,

    pub stage_duration: Histogram,
    pub job_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            jobs_submitted: Counter::new(),
            jobs_succeeded: Counter::new(),
            jobs_failed: Counter::new(),
            jobs_partially_failed: Counter::new(),
            jobs_rejected: Counter::new(),
            active_jobs: Gauge::new(),

            stages_completed: Counter::new(),
            stages_failed: Counter::new(),
            stages_skipped: Counter::new(),
            stage_parse_failures: Counter::new(),

            cache_hits: Counter::new(),
            cache_coalesced: Counter::new(),
            cache_misses: Counter::new(),
            cache_evictions: Counter::new(),

            sandbox_invocations: Counter::new(),
            sandbox_faults: Counter::new(),
            limit_violations_cpu: Counter::new(),
            limit_violations_memory: Counter::new(),
            limit_violations_wall: Counter::new(),
            limit_violations_output: Counter::new(),

            cleanup_success: Counter::new(),
            cleanup_failure: Counter::new(),

            stage_duration: Histogram::new_stage_latency(),
            job_duration: Histogram::new_stage_latency(),
        }
    }

    /// Record the terminal status of a job
    pub fn record_job(&self, status: JobStatus, elapsed: Duration) {
        match status {
            JobStatus::Succeeded => self.jobs_succeeded.inc(),
            JobStatus::Failed => self.jobs_failed.inc(),
            JobStatus::PartiallyFailed => self.jobs_partially_failed.inc(),
            JobStatus::Pending | JobStatus::Running => return,
        }
        self.job_duration.observe(elapsed);
    }

    pub fn record_stage(&self, outcome: StageOutcome, elapsed: Duration) {
        match outcome {
            StageOutcome::Completed => self.stages_completed.inc(),
            StageOutcome::NotRun | StageOutcome::ToolchainUnavailable => {
                self.stages_skipped.inc();
                return;
            }
            StageOutcome::ParseFailure => {
                self.stage_parse_failures.inc();
                self.stages_failed.inc();
            }
            _ => self.stages_failed.inc(),
        }
        self.stage_duration.observe(elapsed);
    }

    pub fn record_limits(&self, exceeded: &ResourceExceeded) {
        if exceeded.cpu {
            self.limit_violations_cpu.inc();
        }
        if exceeded.memory {
            self.limit_violations_memory.inc();
        }
        if exceeded.time {
            self.limit_violations_wall.inc();
        }
        if exceeded.output {
            self.limit_violations_output.inc();
        }
    }

    pub fn record_cleanup(&self, success: bool) {
        if success {
            self.cleanup_success.inc();
        } else {
            self.cleanup_failure.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP compilebox_jobs_submitted_total Jobs accepted by the pipeline\n");
        output.push_str("# TYPE compilebox_jobs_submitted_total counter\n");
        output.push_str(&format!(
            "compilebox_jobs_submitted_total {}\n",
            self.jobs_submitted.get()
        ));
        output.push_str(&format!(
            "compilebox_jobs_rejected_total {}\n",
            self.jobs_rejected.get()
        ));

        output.push_str("# HELP compilebox_jobs_total Jobs by terminal status\n");
        output.push_str("# TYPE compilebox_jobs_total counter\n");
        for (status, counter) in [
            ("succeeded", &self.jobs_succeeded),
            ("failed", &self.jobs_failed),
            ("partially_failed", &self.jobs_partially_failed),
        ] {
            output.push_str(&format!(
                "compilebox_jobs_total{{status=\"{}\"}} {}\n",
                status,
                counter.get()
            ));
        }

        output.push_str("# HELP compilebox_active_jobs Jobs currently running\n");
        output.push_str("# TYPE compilebox_active_jobs gauge\n");
        output.push_str(&format!("compilebox_active_jobs {}\n", self.active_jobs.get()));

        output.push_str("# HELP compilebox_stages_total Stage outcomes\n");
        output.push_str("# TYPE compilebox_stages_total counter\n");
        for (outcome, counter) in [
            ("completed", &self.stages_completed),
            ("failed", &self.stages_failed),
            ("skipped", &self.stages_skipped),
            ("parse_failure", &self.stage_parse_failures),
        ] {
            output.push_str(&format!(
                "compilebox_stages_total{{outcome=\"{}\"}} {}\n",
                outcome,
                counter.get()
            ));
        }

        output.push_str("# HELP compilebox_cache_total Result cache activity\n");
        output.push_str("# TYPE compilebox_cache_total counter\n");
        for (event, counter) in [
            ("hit", &self.cache_hits),
            ("coalesced", &self.cache_coalesced),
            ("miss", &self.cache_misses),
            ("eviction", &self.cache_evictions),
        ] {
            output.push_str(&format!(
                "compilebox_cache_total{{event=\"{}\"}} {}\n",
                event,
                counter.get()
            ));
        }

        output.push_str("# HELP compilebox_sandbox_invocations_total Sandboxed tool runs\n");
        output.push_str("# TYPE compilebox_sandbox_invocations_total counter\n");
        output.push_str(&format!(
            "compilebox_sandbox_invocations_total {}\n",
            self.sandbox_invocations.get()
        ));
        output.push_str(&format!(
            "compilebox_sandbox_faults_total {}\n",
            self.sandbox_faults.get()
        ));

        output.push_str("# HELP compilebox_limit_violations_total Limit violations by kind\n");
        output.push_str("# TYPE compilebox_limit_violations_total counter\n");
        for (kind, counter) in [
            ("cpu", &self.limit_violations_cpu),
            ("memory", &self.limit_violations_memory),
            ("wall", &self.limit_violations_wall),
            ("output", &self.limit_violations_output),
        ] {
            output.push_str(&format!(
                "compilebox_limit_violations_total{{kind=\"{}\"}} {}\n",
                kind,
                counter.get()
            ));
        }

        output.push_str("# HELP compilebox_cleanup_total Scratch directory cleanup outcomes\n");
        output.push_str("# TYPE compilebox_cleanup_total counter\n");
        output.push_str(&format!(
            "compilebox_cleanup_total{{outcome=\"success\"}} {}\n",
            self.cleanup_success.get()
        ));
        output.push_str(&format!(
            "compilebox_cleanup_total{{outcome=\"failure\"}} {}\n",
            self.cleanup_failure.get()
        ));

        self.stage_duration.render(
            "compilebox_stage_duration_seconds",
            "Stage wall time",
            &mut output,
        );
        self.job_duration
            .render("compilebox_job_duration_seconds", "Job wall time", &mut output);

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_saturates() {
        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let histogram = Histogram::new_stage_latency();
        histogram.observe(Duration::from_millis(40));
        histogram.observe(Duration::from_millis(400));
        histogram.observe(Duration::from_secs(20));

        assert_eq!(histogram.get_count(), 3);
        assert_eq!(histogram.get_bucket_count(0.05), 1);
        assert_eq!(histogram.get_bucket_count(0.5), 2);
        assert_eq!(histogram.get_bucket_count(30.0), 3);
    }

    #[test]
    fn test_record_job_and_stage() {
        let metrics = MetricsRegistry::new();
        metrics.record_job(JobStatus::Succeeded, Duration::from_millis(5));
        metrics.record_job(JobStatus::PartiallyFailed, Duration::from_millis(5));
        metrics.record_job(JobStatus::Running, Duration::from_millis(5));
        assert_eq!(metrics.jobs_succeeded.get(), 1);
        assert_eq!(metrics.jobs_partially_failed.get(), 1);
        assert_eq!(metrics.job_duration.get_count(), 2);

        metrics.record_stage(StageOutcome::ParseFailure, Duration::from_millis(1));
        metrics.record_stage(StageOutcome::NotRun, Duration::ZERO);
        assert_eq!(metrics.stages_failed.get(), 1);
        assert_eq!(metrics.stage_parse_failures.get(), 1);
        assert_eq!(metrics.stages_skipped.get(), 1);
        assert_eq!(metrics.stage_duration.get_count(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();
        metrics.record_job(JobStatus::Failed, Duration::from_millis(10));
        metrics.record_limits(&ResourceExceeded {
            time: true,
            ..Default::default()
        });
        metrics.cache_hits.inc();

        let output = metrics.export_prometheus();
        assert!(output.contains("compilebox_jobs_total{status=\"failed\"} 1"));
        assert!(output.contains("compilebox_limit_violations_total{kind=\"wall\"} 1"));
        assert!(output.contains("compilebox_cache_total{event=\"hit\"} 1"));
        assert!(output.contains("compilebox_job_duration_seconds_count 1"));
    }

    #[test]
    fn test_global_metrics() {
        let metrics1 = get_metrics();
        let metrics2 = get_metrics();
        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
