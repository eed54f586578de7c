// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! `.agentci/` directory layout and run identifiers.

use anyhow::{bail, Result};
use rand::RngCore;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const TRACE_FILE: &str = "trace.jsonl";
pub const SIGNATURE_FILE: &str = "signature.json";
pub const FINDINGS_FILE: &str = "findings.json";
pub const CONFIG_FILE: &str = "config.yaml";
pub const BASELINE_FILE: &str = "baseline.json";
pub const BASELINE_META_FILE: &str = "baseline.meta.json";

/// `<workspace>/.agentci`
pub fn agentci_dir(workspace: &Path) -> PathBuf {
    workspace.join(".agentci")
}

/// `<workspace>/.agentci/runs`
pub fn runs_dir(workspace: &Path) -> PathBuf {
    agentci_dir(workspace).join("runs")
}

/// `<workspace>/.agentci/runs/<run_id>`
pub fn run_dir(workspace: &Path, run_id: &str) -> PathBuf {
    runs_dir(workspace).join(run_id)
}

/// `<workspace>/.agentci/config.yaml`
pub fn config_path(workspace: &Path) -> PathBuf {
    agentci_dir(workspace).join(CONFIG_FILE)
}

/// New run id: `<unix_millis>-<hex12>`.
pub fn new_run_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        hex::encode(bytes)
    )
}

/// Run ids parsed from untrusted input must match `^[\w.:-]+$`, so they
/// can never traverse out of the runs directory.
pub fn is_valid_run_id(run_id: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[\w.:-]+$").expect("run id regex compiles"));
    re.is_match(run_id)
}

/// Resolve an untrusted run reference to an existing run directory.
pub fn resolve_run_dir(workspace: &Path, run_ref: &str) -> Result<PathBuf> {
    if !is_valid_run_id(run_ref) {
        bail!("invalid run id: {:?}", run_ref);
    }
    let dir = run_dir(workspace, run_ref);
    if !dir.is_dir() {
        bail!("no such run: {}", run_ref);
    }
    Ok(dir)
}

/// All run ids under the workspace, sorted (which for generated ids means
/// chronological).
pub fn list_run_ids(workspace: &Path) -> Vec<String> {
    let mut ids: Vec<String> = std::fs::read_dir(runs_dir(workspace))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .filter(|id| is_valid_run_id(id))
                .collect()
        })
        .unwrap_or_default();
    ids.sort();
    ids
}
