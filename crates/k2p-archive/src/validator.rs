use std::io::{Read, Seek, Write as _};
use std::path::Path;

use k2p_base::{ErrorCode, K2pError, ZipLimits};
use k2p_util::fs::is_descendant_of;
use zip::ZipArchive;

/// Basenames starting with this, or paths under this prefix, are
/// housekeeping noise (macOS Finder metadata) that's silently dropped from
/// extraction output but still counted during validation (spec §4.1).
const MACOSX_PREFIX: &str = "__MACOSX/";
const HOUSEKEEPING_FILE_PREFIX: &str = "._";

/// Backslashes become forward slashes and a leading `./` is stripped
/// (spec §4.1 "Normalization rules").
fn normalize_name(raw: &str) -> String {
    let mut name = raw.replace('\\', "/");
    while let Some(stripped) = name.strip_prefix("./") {
        name = stripped.to_string();
    }
    name
}

/// True for macOS Finder metadata noise (spec §4.1 "Normalization rules").
/// Exposed so callers outside this crate (the Intake Service's XML pass,
/// spec §4.4 step 7) can apply the same definition of "housekeeping".
pub fn is_housekeeping(name: &str) -> bool {
    if name.starts_with(MACOSX_PREFIX) || name.contains("/__MACOSX/") {
        return true;
    }
    Path::new(name)
        .file_name()
        .and_then(|f| f.to_str())
        .map(|f| f.starts_with(HOUSEKEEPING_FILE_PREFIX))
        .unwrap_or(false)
}

fn path_segments(name: &str) -> Vec<&str> {
    name.split('/').collect()
}

fn is_suspicious_name(name: &str) -> bool {
    name.is_empty() || name.chars().any(|c| c == '\0' || (c as u32) < 0x20)
}

fn is_unsafe_path(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') {
        return true;
    }
    let segments = path_segments(name);
    if segments.is_empty() {
        return true;
    }
    if segments[0].ends_with(':') {
        return true;
    }
    segments.iter().any(|s| *s == ".." || s.is_empty())
}

fn is_symlink(unix_mode: Option<u32>) -> bool {
    match unix_mode {
        Some(mode) => (mode >> 16) & 0o170000 == 0o120000,
        None => false,
    }
}

fn unsafe_path_error(name: &str) -> K2pError {
    K2pError::new(ErrorCode::ZipPathUnsafe, format!("unsafe path in archive: {name}"))
}

/// Inspects an archive's central directory without extracting, rejecting
/// with a tagged error on the first rule an entry violates, checked in the
/// order listed in spec §4.1. Returns the normalized entry names in
/// archive order (property: re-validating an already-accepted archive
/// yields the same list, spec §8 "Round-trip / idempotence").
pub fn validate<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    limits: &ZipLimits,
) -> Result<Vec<String>, K2pError> {
    let count = archive.len();
    if limits.max_files >= 0 && count as i64 > limits.max_files {
        return Err(K2pError::new(
            ErrorCode::ZipTooManyFiles,
            format!("archive has {count} entries, max is {}", limits.max_files),
        ));
    }

    let mut names = Vec::with_capacity(count);
    let mut cumulative_size: i64 = 0;

    for i in 0..count {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| K2pError::new(ErrorCode::InvalidZip, e.to_string()))?;

        let raw_name = entry.name().to_string();
        let name = normalize_name(&raw_name);

        if is_suspicious_name(&name) || is_unsafe_path(&name) {
            return Err(unsafe_path_error(&raw_name));
        }
        if entry.encrypted() {
            return Err(K2pError::new(ErrorCode::ZipEncrypted, "encrypted entries are not allowed"));
        }
        if is_symlink(entry.unix_mode()) {
            return Err(K2pError::new(ErrorCode::ZipSymlink, "symlinks are not allowed in archive"));
        }
        let depth = path_segments(&name).len() as i64;
        if limits.max_path_depth >= 0 && depth > limits.max_path_depth {
            return Err(K2pError::new(ErrorCode::ZipPathTooDeep, format!("entry {name} is too deep")));
        }
        let entry_size = entry.size() as i64;
        if limits.max_file_bytes >= 0 && entry_size > limits.max_file_bytes {
            return Err(K2pError::new(ErrorCode::ZipEntryTooLarge, format!("entry {name} is too large")));
        }
        cumulative_size += entry_size;
        if limits.max_unpacked_bytes >= 0 && cumulative_size > limits.max_unpacked_bytes {
            return Err(K2pError::new(
                ErrorCode::ZipBomb,
                "archive exceeds maximum total uncompressed size",
            ));
        }

        names.push(name);
    }

    Ok(names)
}

/// Validates, then extracts into `dest`, guaranteeing no path escapes
/// `dest` (property P4). Housekeeping entries are skipped from extraction
/// output, as are any name starting with one of `ignore_prefixes`. On any
/// error the caller is responsible for purging `dest` — no partial state
/// is otherwise observable from this function's return value.
pub fn safe_extract<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    dest: &Path,
    limits: &ZipLimits,
    ignore_prefixes: &[&str],
) -> Result<Vec<String>, K2pError> {
    validate(archive, limits)?;

    std::fs::create_dir_all(dest)
        .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, format!("creating {}: {e}", dest.display())))?;
    let dest_root = std::fs::canonicalize(dest)
        .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, format!("resolving {}: {e}", dest.display())))?;

    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| K2pError::new(ErrorCode::InvalidZip, e.to_string()))?;
        let name = normalize_name(entry.name());

        if is_housekeeping(&name) || ignore_prefixes.iter().any(|p| name.starts_with(p)) {
            continue;
        }

        let target = dest.join(&name);
        // Entries may name directories that don't exist yet; canonicalize
        // against the parent instead of the (possibly nonexistent) target.
        let resolved_parent = target
            .parent()
            .map(|p| {
                std::fs::create_dir_all(p).ok();
                std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
            })
            .unwrap_or_else(|| dest_root.clone());
        let resolved_target = resolved_parent.join(
            target
                .file_name()
                .ok_or_else(|| unsafe_path_error(&name))?,
        );

        if !is_descendant_of(&dest_root, &resolved_parent) {
            return Err(K2pError::new(
                ErrorCode::ZipPathTraversal,
                format!("entry {name} escapes destination directory"),
            ));
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&resolved_target)
                .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, e.to_string()))?;
            continue;
        }

        if let Some(parent) = resolved_target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, e.to_string()))?;
        }

        let mut out = std::fs::File::create(&resolved_target)
            .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, e.to_string()))?;
        stream_copy(&mut entry, &mut out)
            .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, e.to_string()))?;

        extracted.push(name);
    }

    Ok(extracted)
}

/// Streams an entry in 1 MiB chunks rather than materializing it whole
/// (spec §9 "Archive validator streaming").
fn stream_copy<R: Read, W: std::io::Write>(src: &mut R, dst: &mut W) -> std::io::Result<()> {
    const CHUNK: usize = 1024 * 1024;
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            let options = FileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    fn generous_limits() -> ZipLimits {
        ZipLimits {
            max_files: 100,
            max_path_depth: 10,
            max_unpacked_bytes: 10 * 1024 * 1024,
            max_file_bytes: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn validate_accepts_well_formed_archive() {
        let data = build_zip(&[
            ("workflow.knime", b"<root/>"),
            ("CSV Reader (#1)/settings.xml", b"<config/>"),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let names = validate(&mut archive, &generous_limits()).unwrap();
        assert_eq!(names, vec!["workflow.knime", "CSV Reader (#1)/settings.xml"]);
    }

    #[test]
    fn validate_rejects_traversal_name_as_path_unsafe() {
        let data = build_zip(&[("workflow.knime", b""), ("../evil.txt", b"x")]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let err = validate(&mut archive, &generous_limits()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ZipPathUnsafe);
    }

    #[test]
    fn validate_rejects_absolute_path() {
        let data = build_zip(&[("/etc/passwd", b"x")]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let err = validate(&mut archive, &generous_limits()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ZipPathUnsafe);
    }

    #[test]
    fn validate_rejects_too_many_files() {
        let entries: Vec<(String, Vec<u8>)> =
            (0..5).map(|i| (format!("f{i}.txt"), b"x".to_vec())).collect();
        let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        let data = build_zip(&refs);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let limits = ZipLimits { max_files: 3, ..generous_limits() };
        let err = validate(&mut archive, &limits).unwrap_err();
        assert_eq!(err.code, ErrorCode::ZipTooManyFiles);
    }

    #[test]
    fn validate_rejects_entry_too_large() {
        let data = build_zip(&[("big.bin", &vec![0u8; 2048])]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let limits = ZipLimits { max_file_bytes: 1024, ..generous_limits() };
        let err = validate(&mut archive, &limits).unwrap_err();
        assert_eq!(err.code, ErrorCode::ZipEntryTooLarge);
    }

    #[test]
    fn validate_rejects_cumulative_bomb() {
        let data = build_zip(&[("a.bin", &vec![0u8; 600]), ("b.bin", &vec![0u8; 600])]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let limits = ZipLimits { max_unpacked_bytes: 1000, max_file_bytes: 1000, ..generous_limits() };
        let err = validate(&mut archive, &limits).unwrap_err();
        assert_eq!(err.code, ErrorCode::ZipBomb);
    }

    #[test]
    fn validate_rejects_path_too_deep() {
        let data = build_zip(&[("a/b/c/d/e.txt", b"x")]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let limits = ZipLimits { max_path_depth: 2, ..generous_limits() };
        let err = validate(&mut archive, &limits).unwrap_err();
        assert_eq!(err.code, ErrorCode::ZipPathTooDeep);
    }

    #[test]
    fn validate_accepts_limits_exactly_at_boundary() {
        let data = build_zip(&[("a.bin", &vec![0u8; 1000])]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let limits = ZipLimits { max_unpacked_bytes: 1000, max_file_bytes: 1000, ..generous_limits() };
        assert!(validate(&mut archive, &limits).is_ok());
    }

    #[test]
    fn safe_extract_writes_files_under_dest_and_drops_housekeeping() {
        let data = build_zip(&[
            ("workflow.knime", b"<root/>"),
            ("__MACOSX/._workflow.knime", b"junk"),
            ("node/settings.xml", b"<config/>"),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extracted = safe_extract(&mut archive, dir.path(), &generous_limits(), &[]).unwrap();
        assert_eq!(extracted, vec!["workflow.knime", "node/settings.xml"]);
        assert!(dir.path().join("workflow.knime").exists());
        assert!(!dir.path().join("__MACOSX").exists());
    }

    #[test]
    fn validate_is_idempotent_on_reparse() {
        let data = build_zip(&[("workflow.knime", b""), ("a/settings.xml", b"")]);
        let mut archive1 = ZipArchive::new(Cursor::new(data.clone())).unwrap();
        let mut archive2 = ZipArchive::new(Cursor::new(data)).unwrap();
        let first = validate(&mut archive1, &generous_limits()).unwrap();
        let second = validate(&mut archive2, &generous_limits()).unwrap();
        assert_eq!(first, second);
    }
}
