//! Prometheus metric families, registered once at process boot and passed
//! down explicitly rather than reached for through a global (spec §6,
//! SPEC_FULL.md ambient stack). Names and buckets match the `k2p_*` family
//! the original service exposes.

use anyhow::{Context as _, Result};
use k2p_base::JobStatus;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry};

const JOB_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];
const QUEUE_WAIT_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];
const K8S_START_LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

/// All metric families used by the API server and the dispatcher, grouped
/// into one struct so a component takes a single `&Metrics` handle instead
/// of threading a dozen individual counters.
pub struct Metrics {
    pub registry: Registry,

    pub job_created_total: Counter,
    pub job_finished_total: CounterVec,
    pub enqueue_rejected_total: Counter,
    pub worker_errors_total: Counter,
    pub exit_code_total: CounterVec,
    pub error_total: Counter,
    pub kubectl_failures_total: Counter,

    pub job_duration_seconds: Histogram,
    pub job_queue_wait_seconds: Histogram,
    pub job_run_seconds: Histogram,
    pub job_end_to_end_seconds: Histogram,
    pub k8s_job_start_latency_seconds: Histogram,

    pub worker_heartbeat_timestamp_seconds: Gauge,
    pub job_queue_depth: Gauge,
    pub jobs_by_state: GaugeVec,
    pub last_job_finished_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let job_created_total = Counter::with_opts(Opts::new(
            "k2p_job_created_total",
            "Total number of jobs created",
        ))?;
        let job_finished_total = CounterVec::new(
            Opts::new("k2p_job_finished_total", "Total number of jobs finished"),
            &["status"],
        )?;
        let enqueue_rejected_total = Counter::with_opts(Opts::new(
            "k2p_enqueue_rejected_total",
            "Total number of job enqueue rejections",
        ))?;
        let worker_errors_total = Counter::with_opts(Opts::new(
            "k2p_worker_errors_total",
            "Total number of worker loop errors",
        ))?;
        let exit_code_total = CounterVec::new(
            Opts::new("k2p_exit_code_total", "Total number of job exit codes"),
            &["exit_code"],
        )?;
        let error_total = Counter::with_opts(Opts::new(
            "k2p_error_total",
            "Total number of knime2py job failures",
        ))?;
        let kubectl_failures_total = Counter::with_opts(Opts::new(
            "k2p_kubectl_failures_total",
            "Total number of kubectl failures",
        ))?;

        let job_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("k2p_job_duration_seconds", "Job duration in seconds")
                .buckets(JOB_DURATION_BUCKETS.to_vec()),
        )?;
        let job_queue_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k2p_job_queue_wait_seconds",
                "Time from job creation to worker pickup/start (seconds)",
            )
            .buckets(QUEUE_WAIT_BUCKETS.to_vec()),
        )?;
        let job_run_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k2p_job_run_seconds",
                "Time from job start to finish (seconds)",
            )
            .buckets(JOB_DURATION_BUCKETS.to_vec()),
        )?;
        let job_end_to_end_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k2p_job_end_to_end_seconds",
                "Time from job creation to finish (seconds)",
            )
            .buckets(JOB_DURATION_BUCKETS.to_vec()),
        )?;
        let k8s_job_start_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k2p_k8s_job_start_latency_seconds",
                "Time spent submitting job to Kubernetes (seconds)",
            )
            .buckets(K8S_START_LATENCY_BUCKETS.to_vec()),
        )?;

        let worker_heartbeat_timestamp_seconds = Gauge::with_opts(Opts::new(
            "k2p_worker_heartbeat_timestamp_seconds",
            "Worker heartbeat (Unix timestamp)",
        ))?;
        let job_queue_depth = Gauge::with_opts(Opts::new(
            "k2p_job_queue_depth",
            "Number of jobs in QUEUED state",
        ))?;
        let jobs_by_state = GaugeVec::new(
            Opts::new("k2p_jobs_by_state", "Number of jobs by state"),
            &["state"],
        )?;
        let last_job_finished_timestamp_seconds = Gauge::with_opts(Opts::new(
            "k2p_last_job_finished_timestamp_seconds",
            "Unix timestamp of most recently finished job",
        ))?;

        macro_rules! register {
            ($($metric:expr),+ $(,)?) => {
                $(registry.register(Box::new($metric.clone())).context("registering metric")?;)+
            };
        }
        register!(
            job_created_total,
            job_finished_total,
            enqueue_rejected_total,
            worker_errors_total,
            exit_code_total,
            error_total,
            kubectl_failures_total,
            job_duration_seconds,
            job_queue_wait_seconds,
            job_run_seconds,
            job_end_to_end_seconds,
            k8s_job_start_latency_seconds,
            worker_heartbeat_timestamp_seconds,
            job_queue_depth,
            jobs_by_state,
            last_job_finished_timestamp_seconds,
        );

        Ok(Self {
            registry,
            job_created_total,
            job_finished_total,
            enqueue_rejected_total,
            worker_errors_total,
            exit_code_total,
            error_total,
            kubectl_failures_total,
            job_duration_seconds,
            job_queue_wait_seconds,
            job_run_seconds,
            job_end_to_end_seconds,
            k8s_job_start_latency_seconds,
            worker_heartbeat_timestamp_seconds,
            job_queue_depth,
            jobs_by_state,
            last_job_finished_timestamp_seconds,
        })
    }

    /// Records a terminal transition's three duration histograms in one
    /// call, as the dispatcher does for every job it reconciles (spec
    /// §4.5(b)).
    pub fn observe_terminal(&self, status: JobStatus, queue_wait: f64, run: f64, end_to_end: f64) {
        self.job_finished_total
            .with_label_values(&[&status.to_string()])
            .inc();
        self.job_duration_seconds.observe(end_to_end);
        self.job_queue_wait_seconds.observe(queue_wait);
        self.job_run_seconds.observe(run);
        self.job_end_to_end_seconds.observe(end_to_end);
    }

    pub fn observe_exit_code(&self, exit_code: i32) {
        self.exit_code_total
            .with_label_values(&[&exit_code.to_string()])
            .inc();
    }

    /// Refreshes the state-distribution gauges from a fresh count-by-status
    /// snapshot, mirroring the original service's on-scrape DB collector.
    pub fn set_state_gauges(&self, counts_by_status: &[(JobStatus, i64)]) {
        for (status, count) in counts_by_status {
            self.jobs_by_state
                .with_label_values(&[&status.to_string()])
                .set(*count as f64);
        }
        let queued = counts_by_status
            .iter()
            .find(|(status, _)| *status == JobStatus::Queued)
            .map(|(_, count)| *count)
            .unwrap_or(0);
        self.job_queue_depth.set(queued as f64);
    }
}
