// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Baseline management: the approved signature a run is diffed against.
//!
//! `baseline.json` is a byte-for-byte copy of the source run's
//! `signature.json` so its HMAC stays comparable; `baseline.meta.json`
//! records who approved it and why, and `baseline.checksum` authenticates
//! it under the project secret (keyed to the source run id).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::integrity::{self, ChecksumKind, VerifyResult};
use crate::runs::{agentci_dir, run_dir, BASELINE_FILE, BASELINE_META_FILE, SIGNATURE_FILE};
use crate::signature::EffectSignature;

/// Metadata sidecar for the stored baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMeta {
    pub created_at: String,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// SHA-256 of the baseline signature JSON.
    pub signature_digest: String,
    /// The run the baseline was promoted from.
    pub run_id: String,
}

/// Promote a run's signature to the project baseline.
pub fn set_baseline(workspace: &Path, run_id: &str, reason: Option<&str>) -> Result<PathBuf> {
    let signature_path = run_dir(workspace, run_id).join(SIGNATURE_FILE);
    if !signature_path.is_file() {
        bail!(
            "run {} has no signature (run `agentci summarize {}` first)",
            run_id,
            run_id
        );
    }
    // Validate before promoting.
    let signature = EffectSignature::load(&signature_path)?;

    let dir = agentci_dir(workspace);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let baseline_path = dir.join(BASELINE_FILE);
    std::fs::copy(&signature_path, &baseline_path)
        .with_context(|| "Failed to copy signature to baseline")?;

    let meta = BaselineMeta {
        created_at: chrono::Utc::now().to_rfc3339(),
        created_by: std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string()),
        reason: reason.map(str::to_string),
        signature_digest: signature.digest(),
        run_id: run_id.to_string(),
    };
    let meta_path = dir.join(BASELINE_META_FILE);
    std::fs::write(
        &meta_path,
        serde_json::to_string_pretty(&meta).with_context(|| "Failed to serialize meta")?,
    )
    .with_context(|| format!("Failed to write {}", meta_path.display()))?;

    integrity::write_checksum(&baseline_path, ChecksumKind::Signature, run_id, workspace)?;
    Ok(baseline_path)
}

/// Load the baseline signature, if one was set.
pub fn load_baseline(workspace: &Path) -> Result<Option<EffectSignature>> {
    let path = agentci_dir(workspace).join(BASELINE_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    EffectSignature::load(&path).map(Some)
}

/// Load the baseline metadata, if present.
pub fn load_baseline_meta(workspace: &Path) -> Option<BaselineMeta> {
    let path = agentci_dir(workspace).join(BASELINE_META_FILE);
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Verify the baseline against its checksum. `None` when no baseline is
/// set or it has no metadata to key the verification with.
pub fn verify_baseline(workspace: &Path) -> Option<VerifyResult> {
    let baseline_path = agentci_dir(workspace).join(BASELINE_FILE);
    if !baseline_path.is_file() {
        return None;
    }
    let meta = load_baseline_meta(workspace)?;
    integrity::verify_if_present(&baseline_path, &meta.run_id, workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureEffects;

    fn prepare_run(workspace: &Path, run_id: &str) -> EffectSignature {
        let mut sig = EffectSignature::empty("0.0.0-test");
        sig.effects = SignatureEffects {
            net_hosts: vec!["api.example.com".to_string()],
            ..Default::default()
        };
        let dir = run_dir(workspace, run_id);
        std::fs::create_dir_all(&dir).unwrap();
        sig.save(&dir.join(SIGNATURE_FILE)).unwrap();
        sig
    }

    #[test]
    fn test_set_and_load_baseline() {
        let dir = tempfile::tempdir().unwrap();
        crate::integrity::generate_secret(dir.path()).unwrap();
        let sig = prepare_run(dir.path(), "run-1");

        set_baseline(dir.path(), "run-1", Some("first approved run")).unwrap();

        let loaded = load_baseline(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, sig);

        let meta = load_baseline_meta(dir.path()).unwrap();
        assert_eq!(meta.run_id, "run-1");
        assert_eq!(meta.reason.as_deref(), Some("first approved run"));
        assert_eq!(meta.signature_digest, sig.digest());
    }

    #[test]
    fn test_baseline_checksum_verifies() {
        let dir = tempfile::tempdir().unwrap();
        crate::integrity::generate_secret(dir.path()).unwrap();
        prepare_run(dir.path(), "run-1");
        set_baseline(dir.path(), "run-1", None).unwrap();

        let result = verify_baseline(dir.path()).unwrap();
        assert!(result.valid, "{}", result.details);
    }

    #[test]
    fn test_tampered_baseline_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        crate::integrity::generate_secret(dir.path()).unwrap();
        prepare_run(dir.path(), "run-1");
        set_baseline(dir.path(), "run-1", None).unwrap();

        let baseline_path = agentci_dir(dir.path()).join(BASELINE_FILE);
        let mut content = std::fs::read(&baseline_path).unwrap();
        content.extend_from_slice(b"\n");
        std::fs::write(&baseline_path, content).unwrap();

        let result = verify_baseline(dir.path()).unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn test_no_baseline_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_baseline(dir.path()).unwrap().is_none());
        assert!(verify_baseline(dir.path()).is_none());
    }

    #[test]
    fn test_missing_run_signature_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(set_baseline(dir.path(), "no-such-run", None).is_err());
    }
}
