//! Filesystem-safe filename sanitization.

/// Sanitizes a candidate filename for safe use on local filesystems.
///
/// - Replaces path separators, NUL, control characters, and the
///   Windows-reserved set `<>:"|?*` with `_`
/// - Collapses runs of underscores
/// - Trims leading/trailing spaces, dots, and underscores
/// - Limits length to 255 bytes (NAME_MAX)
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replaced = match c {
            '\0' | '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        };

        if replaced == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replaced);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators_and_reserved() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("re:port?.pdf"), "re_port_.pdf");
        assert_eq!(sanitize_filename("movie*final|cut.mkv"), "movie_final_cut.mkv");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  ..  file.txt  ..  "), "file.txt");
    }

    #[test]
    fn collapses_underscore_runs() {
        assert_eq!(sanitize_filename("file<<>>name.txt"), "file_name.txt");
    }

    #[test]
    fn keeps_spaces_inside() {
        assert_eq!(sanitize_filename("my report.pdf"), "my report.pdf");
    }

    #[test]
    fn truncates_long_names_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
