use std::path::Path;

use anyhow::{Context as _, Result};

/// Thin wrapper around `std::fs` that adds the path to every I/O error,
/// mirroring `maelstrom_util::fs::Fs`. Zero-sized; exists purely so call
/// sites read `Fs.write(path, data)` instead of repeating `.with_context`
/// everywhere.
#[derive(Copy, Clone, Default)]
pub struct Fs;

impl Fs {
    pub fn new() -> Self {
        Self
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).with_context(|| format!("creating directory {}", path.display()))
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = path.as_ref();
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))
    }

    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::remove_dir_all(path).with_context(|| format!("removing directory {}", path.display()))
    }

    pub fn canonicalize(&self, path: impl AsRef<Path>) -> Result<std::path::PathBuf> {
        let path = path.as_ref();
        std::fs::canonicalize(path).with_context(|| format!("canonicalizing {}", path.display()))
    }
}

/// True iff `candidate`, once canonicalized, is `root` itself or a
/// descendant of it. Used by both the Archive Validator's extraction check
/// (spec invariant P4) and the result-download path-safety check (§9).
pub fn is_descendant_of(root: &Path, candidate: &Path) -> bool {
    candidate == root || candidate.ancestors().any(|a| a == root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn descendant_check_accepts_root_itself() {
        let root = PathBuf::from("/a/b");
        assert!(is_descendant_of(&root, &root));
    }

    #[test]
    fn descendant_check_accepts_nested_path() {
        let root = PathBuf::from("/a/b");
        assert!(is_descendant_of(&root, &PathBuf::from("/a/b/c/d")));
    }

    #[test]
    fn descendant_check_rejects_sibling_path() {
        let root = PathBuf::from("/a/b");
        assert!(!is_descendant_of(&root, &PathBuf::from("/a/c")));
    }
}
