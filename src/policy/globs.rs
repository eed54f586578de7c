// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Shared glob and host matching semantics.
//!
//! Paths match with a conventional extended-glob grammar (`**` spans
//! segments, `*` stays within a segment, `?` is one character). A leading
//! `~/` in pattern or candidate expands to the user home; a leading `./`
//! is stripped from both so `./src/x` and `src/x` compare equal.

use glob_match::glob_match;

/// Expand a leading `~` / `~/` to the user home directory.
pub fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            let home = home.trim_end_matches('/');
            if !home.is_empty() {
                if path == "~" {
                    return home.to_string();
                }
                return format!("{}{}", home, &path[1..]);
            }
        }
    }
    path.to_string()
}

/// Normalize a match candidate or pattern: forward slashes, no leading `./`.
pub fn normalize_for_match(value: &str) -> String {
    let v = value.replace('\\', "/");
    v.strip_prefix("./").map(str::to_string).unwrap_or(v)
}

/// Extended-glob match for paths, with tilde expansion on both sides.
pub fn path_glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern = normalize_for_match(&expand_tilde(pattern));
    let candidate = normalize_for_match(&expand_tilde(candidate));
    glob_match(&pattern, &candidate)
}

/// Case-insensitive glob match, used for env var names and hosts.
pub fn ci_glob_match(pattern: &str, value: &str) -> bool {
    glob_match(&pattern.to_lowercase(), &value.to_lowercase())
}

/// Host allow-list semantics: exact compare (case-insensitive) or
/// wildcard-prefix `*.suffix` (matching the suffix itself and any
/// subdomain of it).
pub fn host_allowed(host: &str, patterns: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        if let Some(suffix) = pattern.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == pattern
        }
    })
}
