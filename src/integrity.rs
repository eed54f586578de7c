// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Integrity layer: per-project secret lifecycle, HMAC-SHA256 over trace
//! and signature files, and timing-safe verification.
//!
//! The secret is 32 CSPRNG bytes hex-encoded, stored owner-only at
//! `<workspace>/.agentci/secret` and held in memory behind `Zeroizing`.
//! When no secret file exists, artifacts are keyed by the legacy string
//! `agentci-legacy:<run_id>` so old projects still verify.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::runs::agentci_dir;

type HmacSha256 = Hmac<Sha256>;

/// Secret file name under `.agentci/`.
pub const SECRET_FILE: &str = "secret";
const SECRET_BYTES: usize = 32;

/// Which key signed an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySource {
    #[serde(rename = "project-secret")]
    ProjectSecret,
    #[serde(rename = "legacy")]
    Legacy,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::ProjectSecret => write!(f, "project-secret"),
            KeySource::Legacy => write!(f, "legacy"),
        }
    }
}

/// Which artifact a checksum covers; selects the filename field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Trace,
    Signature,
}

/// On-disk checksum file, adjacent to its target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumFile {
    pub algorithm: String,
    pub hmac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_file: Option<String>,
    pub run_id: String,
    pub key_source: KeySource,
    pub computed_at: String,
}

/// Verification outcome. `details` names the key source and, on failure,
/// what went wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub details: String,
}

impl VerifyResult {
    fn invalid(details: String) -> Self {
        Self {
            valid: false,
            details,
        }
    }
}

/// Generate the project secret if it does not exist yet. Returns the
/// secret path. Safe to call repeatedly.
pub fn generate_secret(workspace: &Path) -> Result<PathBuf> {
    let dir = agentci_dir(workspace);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(SECRET_FILE);
    if path.exists() {
        return Ok(path);
    }

    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);

    write_owner_only(&path, secret.as_bytes())
        .with_context(|| format!("Failed to write secret: {}", path.display()))?;
    verify_owner_only(&path);
    Ok(path)
}

/// Load the project secret, if the project has one.
pub fn load_secret(workspace: &Path) -> Option<Zeroizing<String>> {
    let path = agentci_dir(workspace).join(SECRET_FILE);
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Zeroizing::new(trimmed.to_string()))
}

fn key_material(workspace: &Path, run_id: &str) -> (Zeroizing<String>, KeySource) {
    match load_secret(workspace) {
        Some(secret) => (secret, KeySource::ProjectSecret),
        None => (
            Zeroizing::new(format!("agentci-legacy:{}", run_id)),
            KeySource::Legacy,
        ),
    }
}

fn key_for_source(
    workspace: &Path,
    run_id: &str,
    source: KeySource,
) -> Option<Zeroizing<String>> {
    match source {
        KeySource::ProjectSecret => load_secret(workspace),
        KeySource::Legacy => Some(Zeroizing::new(format!("agentci-legacy:{}", run_id))),
    }
}

/// HMAC-SHA256 over `data`, hex-encoded.
pub fn compute_hmac_hex(data: &[u8], key: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute and write the checksum file for `target`, adjacent to it
/// (`trace.jsonl` → `trace.checksum`). Returns the checksum path.
pub fn write_checksum(
    target: &Path,
    kind: ChecksumKind,
    run_id: &str,
    workspace: &Path,
) -> Result<PathBuf> {
    let data = std::fs::read(target)
        .with_context(|| format!("Failed to read {}", target.display()))?;
    let (key, key_source) = key_material(workspace, run_id);
    let hmac = compute_hmac_hex(&data, key.as_bytes());

    let basename = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let checksum = ChecksumFile {
        algorithm: "hmac-sha256".to_string(),
        hmac,
        trace_file: matches!(kind, ChecksumKind::Trace).then(|| basename.clone()),
        signature_file: matches!(kind, ChecksumKind::Signature).then(|| basename.clone()),
        run_id: run_id.to_string(),
        key_source,
        computed_at: chrono::Utc::now().to_rfc3339(),
    };

    let path = checksum_path_for(target);
    let json = serde_json::to_string_pretty(&checksum)
        .with_context(|| "Failed to serialize checksum")?;
    write_owner_only(&path, json.as_bytes())
        .with_context(|| format!("Failed to write checksum: {}", path.display()))?;
    Ok(path)
}

/// The checksum path adjacent to a target file (extension → `.checksum`).
pub fn checksum_path_for(target: &Path) -> PathBuf {
    target.with_extension("checksum")
}

/// Verify a target file against its checksum.
pub fn verify_checksum(
    target: &Path,
    checksum_path: &Path,
    run_id: &str,
    workspace: &Path,
) -> VerifyResult {
    let checksum_raw = match std::fs::read_to_string(checksum_path) {
        Ok(c) => c,
        Err(e) => {
            return VerifyResult::invalid(format!(
                "cannot read checksum file {}: {}",
                checksum_path.display(),
                e
            ));
        }
    };
    let checksum: ChecksumFile = match serde_json::from_str(&checksum_raw) {
        Ok(c) => c,
        Err(e) => return VerifyResult::invalid(format!("malformed checksum file: {}", e)),
    };
    if checksum.algorithm != "hmac-sha256" {
        return VerifyResult::invalid(format!(
            "unsupported checksum algorithm: {}",
            checksum.algorithm
        ));
    }
    if checksum.run_id != run_id {
        return VerifyResult::invalid(format!(
            "run id mismatch: checksum is for {}, expected {}",
            checksum.run_id, run_id
        ));
    }

    let data = match std::fs::read(target) {
        Ok(d) => d,
        Err(e) => {
            return VerifyResult::invalid(format!(
                "cannot read target {}: {}",
                target.display(),
                e
            ));
        }
    };
    let key = match key_for_source(workspace, run_id, checksum.key_source) {
        Some(k) => k,
        None => {
            return VerifyResult::invalid(
                "checksum was keyed by the project secret, but no secret file exists"
                    .to_string(),
            );
        }
    };
    let computed = compute_hmac_hex(&data, key.as_bytes());

    if timing_safe_eq(computed.as_bytes(), checksum.hmac.as_bytes()) {
        VerifyResult {
            valid: true,
            details: format!("verified with {} key", checksum.key_source),
        }
    } else {
        VerifyResult::invalid(format!(
            "HMAC mismatch: file was modified after the checksum was computed (keyed by {})",
            checksum.key_source
        ))
    }
}

/// Constant-time comparison without short-circuiting on mismatch. On a
/// length mismatch a dummy self-compare runs first so the timing profile
/// matches a value mismatch.
fn timing_safe_eq(computed: &[u8], stored: &[u8]) -> bool {
    if computed.len() != stored.len() {
        let _ = fold_xor(computed, computed);
        return false;
    }
    fold_xor(computed, stored) == 0
}

fn fold_xor(a: &[u8], b: &[u8]) -> u8 {
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result
}

#[cfg(unix)]
fn write_owner_only(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

/// Warn (never fail) when the filesystem cannot enforce owner-only mode.
fn verify_owner_only(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                eprintln!(
                    "[agentci] warning: {} has mode {:o}, expected owner-only 600",
                    path.display(),
                    mode
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        crate::debug_log!(
            "cannot enforce owner-only mode on {} on this platform",
            path.display()
        );
    }
}

/// Convenience used by `verify`: check a run artifact if it exists.
/// Returns `None` when the target is absent.
pub fn verify_if_present(
    target: &Path,
    run_id: &str,
    workspace: &Path,
) -> Option<VerifyResult> {
    if !target.exists() {
        return None;
    }
    let checksum_path = checksum_path_for(target);
    if !checksum_path.exists() {
        return Some(VerifyResult::invalid(format!(
            "no checksum file for {}",
            target.display()
        )));
    }
    Some(verify_checksum(target, &checksum_path, run_id, workspace))
}
