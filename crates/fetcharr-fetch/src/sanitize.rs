//! Destination file name sanitation.

/// Maximum UTF-8 length of a sanitized name in bytes.
const NAME_MAX_BYTES: usize = 200;

/// Sanitize a service-reported file name for use on the local filesystem.
///
/// - Replaces NUL, path separators, and control characters with `_`
/// - Collapses runs of whitespace into a single space
/// - Trims leading/trailing spaces and dots
/// - Truncates to 200 bytes of UTF-8 on a character boundary
///
/// Falls back to `download` when nothing survives.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_space = false;

    for c in name.chars() {
        if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            if !prev_space {
                out.push('_');
            }
            prev_space = false;
            continue;
        }
        if c.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
            continue;
        }
        out.push(c);
        prev_space = false;
    }

    let trimmed = out.trim_matches(|c: char| c == ' ' || c == '.');
    let mut take = trimmed.len().min(NAME_MAX_BYTES);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    let result = trimmed[..take].trim_end_matches([' ', '.']);

    if result.is_empty() {
        "download".to_string()
    } else {
        result.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_separators_are_neutralized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("a\\b/c.mkv"), "a_b_c.mkv");
    }

    #[test]
    fn whitespace_collapses_to_single_spaces() {
        assert_eq!(
            sanitize_file_name("Some   Movie \t (2024).mkv"),
            "Some Movie (2024).mkv"
        );
    }

    #[test]
    fn nul_and_controls_are_replaced() {
        assert_eq!(sanitize_file_name("bad\0name\x07.bin"), "bad_name_.bin");
    }

    #[test]
    fn long_names_truncate_on_char_boundaries() {
        let long = "é".repeat(150); // 300 bytes of UTF-8
        let sanitized = sanitize_file_name(&long);
        assert!(sanitized.len() <= 200);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn empty_results_fall_back() {
        assert_eq!(sanitize_file_name("   .. "), "download");
        assert_eq!(sanitize_file_name(""), "download");
    }
}
