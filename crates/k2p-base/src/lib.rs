//! Domain types shared by every k2pweb component: the `Job` record and its
//! lifecycle, the settings-metadata catalog, zip limits, and the tagged
//! error taxonomy. Kept dependency-light (no tokio, no sqlx) so that
//! `k2p-archive` and the backend crates can depend on it without pulling in
//! the Job Store's storage stack.

pub mod error;
pub mod job;
pub mod tail;

pub use error::{find_k2p_error, ErrorCode, K2pError};
pub use job::{Job, JobId, JobSettingsMeta, JobStatus, ZipLimits};
pub use tail::{standard_tail, tail, TAIL_MAX_BYTES, TAIL_MAX_LINES};
