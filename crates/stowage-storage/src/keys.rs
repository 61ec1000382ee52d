//! Storage key sanitization.
//!
//! A declared file name becomes a flat key: only the final path component is
//! kept, and anything outside `[A-Za-z0-9._-]` is replaced with `_`.

use crate::traits::{StorageError, StorageResult};

/// Longest file name common filesystems accept.
const MAX_KEY_LEN: usize = 255;
const MAX_EXTENSION_LEN: usize = 16;

/// Turn a client-supplied file name into a safe storage key.
pub fn sanitize_file_name(name: &str) -> StorageResult<String> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();

    if file_name.is_empty() || file_name == "." || file_name == ".." {
        return Err(StorageError::InvalidKey(format!(
            "File name {:?} cannot be stored",
            name
        )));
    }

    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Leading dots would hide the file and collide with staging names
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        return Err(StorageError::InvalidKey(format!(
            "File name {:?} cannot be stored",
            name
        )));
    }

    Ok(truncate_key(sanitized))
}

/// Cap a sanitized (ASCII) key at [`MAX_KEY_LEN`] bytes, keeping a short
/// extension intact.
fn truncate_key(key: &str) -> String {
    if key.len() <= MAX_KEY_LEN {
        return key.to_string();
    }
    let extension = key
        .rfind('.')
        .map(|dot| &key[dot..])
        .filter(|ext| ext.len() <= MAX_EXTENSION_LEN)
        .unwrap_or("");
    let stem = &key[..MAX_KEY_LEN - extension.len()];
    format!("{}{}", stem, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(sanitize_file_name("sample.csv").unwrap(), "sample.csv");
        assert_eq!(sanitize_file_name("my-data_2024.csv").unwrap(), "my-data_2024.csv");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/evil.csv").unwrap(), "evil.csv");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\data.csv").unwrap(), "data.csv");
        assert_eq!(sanitize_file_name("/abs/path.csv").unwrap(), "path.csv");
    }

    #[test]
    fn sanitize_rejects_dot_components() {
        for name in ["", ".", "..", "../..", "dir/..", "   "] {
            assert!(
                matches!(sanitize_file_name(name), Err(StorageError::InvalidKey(_))),
                "expected {:?} to be rejected",
                name
            );
        }
    }

    #[test]
    fn sanitize_keeps_repeated_dots_inside_names() {
        assert_eq!(sanitize_file_name("a..b.csv").unwrap(), "a..b.csv");
        assert_eq!(sanitize_file_name("report..v2.csv").unwrap(), "report..v2.csv");
        assert_eq!(sanitize_file_name("data...csv").unwrap(), "data...csv");
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_file_name("my file (1).csv").unwrap(), "my_file__1_.csv");
        assert_eq!(sanitize_file_name("данные.csv").unwrap(), "______.csv");
    }

    #[test]
    fn sanitize_strips_leading_dots() {
        assert_eq!(sanitize_file_name(".hidden.csv").unwrap(), "hidden.csv");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = format!("{}.csv", "a".repeat(400));
        let key = sanitize_file_name(&long).unwrap();
        assert_eq!(key.len(), 255);
        assert!(key.ends_with("a.csv"));

        let no_extension = "b".repeat(300);
        assert_eq!(sanitize_file_name(&no_extension).unwrap().len(), 255);
    }
}
