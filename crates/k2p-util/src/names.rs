use regex::Regex;
use std::sync::OnceLock;

fn unsafe_stem_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap())
}

fn unsafe_name_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9-]+").unwrap())
}

/// Derives a filesystem-safe short identifier from a user-supplied filename
/// (spec §4.4 step 6, property P5): replace runs of characters outside
/// `[A-Za-z0-9._-]` with `_`, strip leading/trailing `._-`, truncate to 80,
/// and fall back to `"workflow"` if that leaves nothing.
pub fn safe_stem(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let replaced = unsafe_stem_chars().replace_all(stem, "_");
    let trimmed = replaced.trim_matches(|c| c == '.' || c == '_' || c == '-');
    let truncated: String = trimmed.chars().take(80).collect();
    if truncated.is_empty() {
        "workflow".to_string()
    } else {
        truncated
    }
}

/// Derives the Orchestrator backend's external job name from a job id
/// (spec §4.5(a), property P6): lowercase, non-`[a-z0-9-]` runs become `-`,
/// prefix `k2p-`, truncate to 63, and trim a trailing `-`.
pub fn normalize_job_name(job_id: &str) -> String {
    let lowered = job_id.to_ascii_lowercase();
    let base = unsafe_name_chars().replace_all(&lowered, "-");
    let prefixed = format!("k2p-{base}");
    let truncated: String = prefixed.chars().take(63).collect();
    truncated.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_stem_strips_unsafe_characters() {
        assert_eq!(safe_stem("My Workflow!!.zip"), "My_Workflow");
    }

    #[test]
    fn safe_stem_falls_back_to_workflow_when_empty() {
        assert_eq!(safe_stem("...zip"), "workflow");
        assert_eq!(safe_stem("***.zip"), "workflow");
    }

    #[test]
    fn safe_stem_truncates_to_eighty_chars() {
        let long_name = format!("{}.zip", "a".repeat(200));
        let stem = safe_stem(&long_name);
        assert_eq!(stem.len(), 80);
    }

    #[test]
    fn safe_stem_is_idempotent() {
        let once = safe_stem("Weird  Name@@@.zip");
        let twice = safe_stem(&format!("{once}.zip"));
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_job_name_matches_spec_example() {
        assert_eq!(normalize_job_name("ABC_123"), "k2p-abc-123");
    }

    #[test]
    fn normalize_job_name_stays_within_length_and_charset() {
        let id = "a".repeat(80);
        let name = normalize_job_name(&id);
        assert!(name.starts_with("k2p-"));
        assert!(name.len() <= 63);
        assert!(!name.ends_with('-'));
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn normalize_job_name_never_ends_with_dash_even_after_truncation() {
        let id = "----------------------------------------------------------------abc";
        let name = normalize_job_name(id);
        assert!(!name.ends_with('-'));
    }
}
