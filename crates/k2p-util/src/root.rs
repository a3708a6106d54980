use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// An owned path known to be the root of a particular kind of storage,
/// tagged at the type level so a `JobStorageRoot` path and a
/// `ResultStorageRoot` path can never be passed to the wrong function by
/// accident. Mirrors `maelstrom_util::root::RootBuf`, minus the borrowed
/// `Root<Tag>` half — plain `&RootBuf<Tag>` serves that purpose here.
#[derive(Clone, Debug)]
pub struct RootBuf<Tag> {
    path: PathBuf,
    _tag: PhantomData<Tag>,
}

impl<Tag> RootBuf<Tag> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _tag: PhantomData,
        }
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<Tag> From<PathBuf> for RootBuf<Tag> {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl<Tag> AsRef<Path> for RootBuf<Tag> {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Marker for the root under which uploaded job archives are stored
/// (`<JOB_STORAGE>/jobs/<uuid>/<stem>.zip`, spec §6).
#[derive(Copy, Clone, Debug)]
pub struct JobStorageRoot;

/// Marker for the root under which job results are stored
/// (`<RESULT_STORAGE>/jobs/<uuid>/...`, spec §6).
#[derive(Copy, Clone, Debug)]
pub struct ResultStorageRoot;

pub type JobStorageRootBuf = RootBuf<JobStorageRoot>;
pub type ResultStorageRootBuf = RootBuf<ResultStorageRoot>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_builds_relative_path_under_root() {
        let root: JobStorageRootBuf = RootBuf::new(PathBuf::from("/var/k2p/jobs"));
        let joined = root.join("jobs/abc/bundle.zip");
        assert_eq!(joined, PathBuf::from("/var/k2p/jobs/jobs/abc/bundle.zip"));
    }
}
