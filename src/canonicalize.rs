//! Path and hostname canonicalization.
//!
//! Everything here is best-effort and side-effect free apart from reading
//! the filesystem for realpath resolution. Path classification against the
//! workspace root checks both the root as given and its realpath, so a
//! workspace reached through a symlinked parent still classifies correctly.

use std::path::{Component, Path, PathBuf};

/// Hostnames longer than this are rejected by the network patches
/// (RFC 1035 limit on a full domain name).
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Result of resolving a path against the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Lexically absolutized form of the input (no symlink traversal).
    pub requested_abs: PathBuf,
    /// Best-effort realpath; equals `requested_abs` when resolution fails.
    pub resolved_abs: PathBuf,
    /// Whether either form lies under the workspace root (as given or real).
    pub is_workspace_local: bool,
    /// The requested path was inside the workspace but resolved outside it.
    pub is_symlink_escape: bool,
}

/// Lexically absolutize a path: join with the working directory and fold
/// `.` / `..` components without touching the filesystem.
pub fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Best-effort realpath: resolve the deepest existing ancestor through
/// symlinks and reattach the non-existing tail unchanged.
pub fn realpath_best_effort(path: &Path) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }
    let abs = lexical_absolute(path);
    let mut existing = abs.as_path();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while let Some(parent) = existing.parent() {
        if let Some(name) = existing.file_name() {
            tail.push(name.to_os_string());
        }
        existing = parent;
        if existing.exists() {
            break;
        }
    }
    let mut out = std::fs::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
    for segment in tail.iter().rev() {
        out.push(segment);
    }
    out
}

/// Resolve a path and classify it against the workspace root.
pub fn resolve_path_best_effort(input: &Path, workspace_root: &Path) -> ResolvedPath {
    let workspace_original = lexical_absolute(workspace_root);
    let workspace_resolved =
        std::fs::canonicalize(workspace_root).unwrap_or_else(|_| workspace_original.clone());

    let requested_abs = lexical_absolute(input);
    let resolved_abs = realpath_best_effort(&requested_abs);

    let requested_inside = requested_abs.starts_with(&workspace_resolved)
        || requested_abs.starts_with(&workspace_original);
    let resolved_inside = resolved_abs.starts_with(&workspace_resolved)
        || resolved_abs.starts_with(&workspace_original);

    ResolvedPath {
        requested_abs,
        resolved_abs,
        is_workspace_local: resolved_inside || requested_inside,
        is_symlink_escape: requested_inside && !resolved_inside,
    }
}

/// Project a resolved path into workspace-relative form.
///
/// Returns `(value, is_external)`: the relative path when the input lies
/// under the workspace root (as given or real), otherwise the absolute path
/// with `is_external = true`.
pub fn to_workspace_path(resolved_abs: &Path, workspace_root: &Path) -> (String, bool) {
    let workspace_original = lexical_absolute(workspace_root);
    let workspace_resolved =
        std::fs::canonicalize(workspace_root).unwrap_or_else(|_| workspace_original.clone());

    for root in [&workspace_resolved, &workspace_original] {
        if let Ok(rel) = resolved_abs.strip_prefix(root) {
            return (rel.to_string_lossy().into_owned(), false);
        }
    }
    (resolved_abs.to_string_lossy().into_owned(), true)
}

/// Canonicalize a hostname: trim, lower-case, drop a trailing dot, and
/// strip a `:port` suffix. Bracketed IPv6 literals keep their brackets.
pub fn canonical_host(host: &str) -> String {
    let mut h = host.trim().to_ascii_lowercase();
    if h.ends_with('.') {
        h.pop();
    }
    if h.starts_with('[') {
        if let Some(end) = h.find(']') {
            h.truncate(end + 1);
        }
        return h;
    }
    if let Some(idx) = h.rfind(':') {
        let suffix = &h[idx + 1..];
        let is_port = !suffix.is_empty()
            && suffix.chars().all(|c| c.is_ascii_digit())
            && suffix.parse::<u32>().map(|p| p <= 65535).unwrap_or(false);
        if is_port {
            h.truncate(idx);
        }
    }
    h
}

/// eTLD+1 of a host via the public-suffix table.
///
/// Hosts with no resolvable suffix — `localhost`, bare names, IP literals —
/// pass through unchanged (after canonicalization).
pub fn to_etld_plus_1(host: &str) -> String {
    let canonical = canonical_host(host);
    if canonical.is_empty() || canonical.starts_with('[') {
        return canonical;
    }
    if canonical.parse::<std::net::IpAddr>().is_ok() {
        return canonical;
    }
    if !canonical.contains('.') {
        return canonical;
    }
    match psl::domain(canonical.as_bytes()) {
        Some(domain) if domain.suffix().is_known() => {
            String::from_utf8_lossy(domain.as_bytes()).into_owned()
        }
        _ => canonical,
    }
}

/// Final path component of a command, or the command itself when it has no
/// separators (or ends with one).
pub fn command_basename(command: &str) -> String {
    let base = command
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(command);
    if base.is_empty() {
        command.to_string()
    } else {
        base.to_string()
    }
}

/// Normalize a command invocation to `(basename, argv)` where `argv` is
/// `[basename, args...]` with temp-directory arguments collapsed.
pub fn normalize_command(command: &str, args: &[String]) -> (String, Vec<String>) {
    let cmd = command_basename(command);
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(cmd.clone());
    for arg in args {
        argv.push(normalize_arg(arg));
    }
    (cmd, argv)
}

fn normalize_arg(arg: &str) -> String {
    if arg.contains("/tmp/") || arg.contains("\\Temp\\") || arg.contains("\\tmp\\") {
        "<temp>".to_string()
    } else {
        arg.to_string()
    }
}
