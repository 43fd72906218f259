use std::path::{Path, PathBuf};

/// Pattern used by `find-configs` when none is given.
pub const DEFAULT_CONFIG_PATTERN: &str = "*.yaml";

/// Recursively list the files under `dir` whose file name matches an
/// fnmatch-style `pattern` (`*`, `?`, `[...]`, `[!...]`).
///
/// Unreadable entries are logged and skipped; a missing `dir` yields no
/// files. Results are sorted.
pub fn find_config_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, regex::Error> {
    let matcher = regex::Regex::new(&glob_to_regex(pattern))?;
    let mut matches = Vec::new();

    for entry in walkdir::WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    path = ?err.path().unwrap_or(dir),
                    error = %err,
                    "Skipping unreadable entry"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| matcher.is_match(name))
        {
            matches.push(entry.into_path());
        }
    }

    matches.sort();
    Ok(matches)
}

/// Translate an fnmatch glob into an anchored regular expression.
pub fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i + 1) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' {
                        out.push('^');
                        j += 1;
                    }
                    for &c in &chars[j..end] {
                        if matches!(c, '\\' | '[' | ']' | '&' | '~' | '^') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Index of the `]` closing a class opened just before `start`, if any.
///
/// A `]` right after the opening bracket (or after `!`) is a literal.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}
