//! Intake Service (C4): the ordered admission-control and
//! persist-to-storage pipeline run once per uploaded bundle (spec §4.4).

mod pipeline;

use std::sync::Arc;

use k2p_base::ZipLimits;
use k2p_metrics::Metrics;
use k2p_store::Store;
use k2p_util::JobStorageRootBuf;
use slog::Logger;

pub use pipeline::UploadRequest;

/// Tunables the pipeline is parameterized by (spec §4.4, §5 resource caps).
#[derive(Clone, Debug)]
pub struct IntakeLimits {
    pub max_queued_jobs: i64,
    pub max_upload_bytes: i64,
    pub zip_limits: ZipLimits,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            max_queued_jobs: 50,
            max_upload_bytes: 50 * 1024 * 1024,
            zip_limits: ZipLimits::default(),
        }
    }
}

/// Handle through which `POST /jobs` requests are processed end-to-end.
#[derive(Clone)]
pub struct Intake {
    pub(crate) store: Store,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) log: Logger,
    pub(crate) limits: IntakeLimits,
    pub(crate) job_storage_root: JobStorageRootBuf,
}

impl Intake {
    pub fn new(
        store: Store,
        metrics: Arc<Metrics>,
        log: Logger,
        limits: IntakeLimits,
        job_storage_root: JobStorageRootBuf,
    ) -> Self {
        Self { store, metrics, log, limits, job_storage_root }
    }
}
