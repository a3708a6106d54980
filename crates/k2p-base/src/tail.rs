/// Maximum number of trailing lines kept in a captured tail (spec §3, §4.6).
pub const TAIL_MAX_LINES: usize = 40;
/// Maximum number of trailing bytes kept in a captured tail.
pub const TAIL_MAX_BYTES: usize = 4000;

/// Computes the "last ≤40 lines or ≤4000 bytes, whichever is less text"
/// tail of a byte stream (spec §4.6), lossily decoding and trimming
/// surrounding whitespace. Used for stdout/stderr capture and for
/// `kubectl`/`k2p` subprocess stderr in both backends.
pub fn tail(data: &[u8], max_lines: usize, max_bytes: usize) -> String {
    let byte_window = if data.len() > max_bytes {
        &data[data.len() - max_bytes..]
    } else {
        data
    };
    let text = String::from_utf8_lossy(byte_window);
    let line_limited: String = text
        .lines()
        .rev()
        .take(max_lines)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n");
    line_limited.trim().to_string()
}

/// Convenience wrapper using the spec's standard limits.
pub fn standard_tail(data: &[u8]) -> String {
    tail(data, TAIL_MAX_LINES, TAIL_MAX_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_lines_within_byte_budget() {
        let data = (0..100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let out = tail(data.as_bytes(), 5, 4000);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.last(), Some(&"line 99"));
    }

    #[test]
    fn truncates_to_byte_window_first() {
        let data = vec![b'x'; 10_000];
        let out = tail(&data, 40, 100);
        assert!(out.len() <= 100);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let out = tail(b"\n\n  hello  \n\n", 40, 4000);
        assert_eq!(out, "hello");
    }

    #[test]
    fn replaces_invalid_utf8() {
        let out = tail(&[0xff, 0xfe, b'a'], 40, 4000);
        assert!(out.contains('a'));
    }
}
