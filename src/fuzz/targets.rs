//! Changed-file → fuzz harness registry.
//!
//! `fuzz/targets.txt` holds one mapping per line:
//!
//! ```text
//! # source glob        harness
//! src/parsers/*.py     fuzz/fuzz_parser.py
//! src/auth/**          fuzz/fuzz_auth.py
//! ```
//!
//! Globs use fnmatch rules: `*` and `**` both match across `/`.

use std::collections::BTreeSet;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzMapping {
    pub source_glob: String,
    pub harness: String,
}

pub fn parse_targets(content: &str) -> Vec<FuzzMapping> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [glob, harness] => Some(FuzzMapping {
                    source_glob: glob.to_string(),
                    harness: harness.to_string(),
                }),
                _ => {
                    debug!(line, "skipping malformed fuzz target mapping");
                    None
                }
            }
        })
        .collect()
}

/// Missing registry means no mappings.
pub fn load_targets(path: &Path) -> Vec<FuzzMapping> {
    std::fs::read_to_string(path)
        .map(|content| parse_targets(&content))
        .unwrap_or_default()
}

pub fn matches_glob(file_path: &str, glob: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    Pattern::new(&glob.replace("**", "*"))
        .map(|pattern| pattern.matches_with(file_path, options))
        .unwrap_or(false)
}

/// Harnesses to run for `changed`, limited to harness files that exist
/// under `root`. Sorted and deduplicated.
pub fn detect(changed: &[String], mappings: &[FuzzMapping], root: &Path) -> Vec<String> {
    let mut active = BTreeSet::new();
    for file in changed {
        for mapping in mappings {
            if matches_glob(file, &mapping.source_glob) && root.join(&mapping.harness).exists() {
                active.insert(mapping.harness.clone());
            }
        }
    }
    active.into_iter().collect()
}

/// Split the newline-separated `--changed` value.
pub fn parse_changed(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REGISTRY: &str = "\
# source glob        harness
src/parsers/*.py     fuzz/fuzz_parser.py
src/auth/**          fuzz/fuzz_auth.py

too many columns here
lonely
src/*.toml           fuzz/missing_harness.py
";

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("fuzz")).unwrap();
        std::fs::write(dir.path().join("fuzz/fuzz_parser.py"), "").unwrap();
        std::fs::write(dir.path().join("fuzz/fuzz_auth.py"), "").unwrap();
        dir
    }

    #[test]
    fn parses_two_column_lines_only() {
        let mappings = parse_targets(REGISTRY);
        assert_eq!(mappings.len(), 3);
        assert_eq!(mappings[0].source_glob, "src/parsers/*.py");
        assert_eq!(mappings[1].harness, "fuzz/fuzz_auth.py");
    }

    #[test]
    fn missing_registry_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_targets(&dir.path().join("targets.txt")).is_empty());
    }

    #[test]
    fn glob_matching_follows_fnmatch() {
        assert!(matches_glob("src/parsers/json.py", "src/parsers/*.py"));
        assert!(matches_glob("src/parsers/nested/deep.py", "src/parsers/*.py"));
        assert!(matches_glob("src/auth/oauth/token.py", "src/auth/**"));
        assert!(matches_glob("src/a.py", "src/?.py"));
        assert!(!matches_glob("src/parsers/json.rs", "src/parsers/*.py"));
        assert!(!matches_glob("lib/auth/x.py", "src/auth/**"));
        assert!(!matches_glob("src/x.py", "src/[.py"));
    }

    #[test]
    fn detects_existing_harnesses_for_changed_files() {
        let dir = workspace();
        let mappings = parse_targets(REGISTRY);
        let changed = parse_changed(
            "src/auth/login.py\n\nsrc/parsers/csv.py\nsrc/auth/session.py\nsrc/app.toml\n",
        );

        let active = detect(&changed, &mappings, dir.path());
        assert_eq!(active, vec!["fuzz/fuzz_auth.py", "fuzz/fuzz_parser.py"]);
    }

    #[test]
    fn unrelated_changes_select_nothing() {
        let dir = workspace();
        let active = detect(
            &["README.md".to_string()],
            &parse_targets(REGISTRY),
            dir.path(),
        );
        assert!(active.is_empty());
    }
}
