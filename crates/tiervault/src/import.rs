//! Parsing of bulk import files.

use std::path::Path;

use crate::error::{HostError, HostResult};

/// Entries read from an import file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportList {
    /// Accepted entries, in file order.
    pub entries: Vec<String>,
    /// Lines refused by the validator.
    pub invalid: usize,
}

/// One entry per line; blank lines and `#` comments are ignored.
#[must_use]
pub fn parse_codes(text: &str) -> ImportList {
    ImportList {
        entries: meaningful_lines(text).map(str::to_string).collect(),
        invalid: 0,
    }
}

/// Like [`parse_codes`], but only all-digit ids are accepted.
#[must_use]
pub fn parse_user_ids(text: &str) -> ImportList {
    let mut list = ImportList::default();
    for line in meaningful_lines(text) {
        if line.chars().all(|c| c.is_ascii_digit()) {
            list.entries.push(line.to_string());
        } else {
            list.invalid += 1;
        }
    }
    list
}

fn meaningful_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Reads an import file as UTF-8.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn read_import_file(path: &Path) -> HostResult<String> {
    std::fs::read_to_string(path).map_err(|source| HostError::Io {
        op: "read import file",
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes() {
        let list = parse_codes("  A1 \n\n# comment\nB2\r\n");
        assert_eq!(list.entries, ["A1", "B2"]);
        assert_eq!(list.invalid, 0);
    }

    #[test]
    fn test_parse_user_ids_rejects_non_digits() {
        let list = parse_user_ids("10001\nabc\n 10002 \n12 34\n");
        assert_eq!(list.entries, ["10001", "10002"]);
        assert_eq!(list.invalid, 2);
    }
}
