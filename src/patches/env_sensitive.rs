// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Sensitive-environment facade: read hooks over the process environment.
//!
//! Reads (`var`, `var_os`), membership probes (`is_set`), and snapshot
//! iteration (`vars`) emit a `sensitive_access` event when the accessed
//! name matches a `policy.sensitive.block_env` glob (case-insensitive).
//! Writes pass through unchanged and are never recorded.
//!
//! Coverage gap: code that reads `std::env::var` directly bypasses this
//! facade. Reads routed through it — which is how recorded hosts are
//! expected to access configuration — are fully observed.

use std::ffi::OsString;
use std::sync::Arc;

use crate::patches::PatchContext;
use crate::policy::globs;
use crate::trace::{EffectData, SensitiveEffect, SensitiveType};

/// Recorded environment access.
pub struct RecordedEnv {
    ctx: Arc<PatchContext>,
    block_env: Vec<String>,
}

impl RecordedEnv {
    pub fn new(ctx: Arc<PatchContext>) -> Self {
        let block_env = ctx.config.policy.sensitive.block_env.clone();
        Self { ctx, block_env }
    }

    fn is_blocked(&self, key: &str) -> bool {
        self.block_env
            .iter()
            .any(|pattern| globs::ci_glob_match(pattern, key))
    }

    fn record_access(&self, key: &str) {
        if self.ctx.bypassed() {
            return;
        }
        self.ctx.emit(EffectData::sensitive(SensitiveEffect {
            access_type: SensitiveType::EnvVar,
            key_name: Some(key.to_string()),
        }));
    }

    /// Read an environment variable, recording blocked-name accesses.
    pub fn var(&self, key: &str) -> Result<String, std::env::VarError> {
        if self.is_blocked(key) {
            self.record_access(key);
        }
        std::env::var(key)
    }

    /// `var_os` analogue of [`RecordedEnv::var`].
    pub fn var_os(&self, key: &str) -> Option<OsString> {
        if self.is_blocked(key) {
            self.record_access(key);
        }
        std::env::var_os(key)
    }

    /// Membership probe (`in`-style access).
    pub fn is_set(&self, key: &str) -> bool {
        if self.is_blocked(key) {
            self.record_access(key);
        }
        std::env::var_os(key).is_some()
    }

    /// Snapshot of the whole environment. Serializing the map counts as
    /// reading every present blocked name.
    pub fn vars(&self) -> Vec<(String, String)> {
        let snapshot: Vec<(String, String)> = std::env::vars().collect();
        for (key, _) in &snapshot {
            if self.is_blocked(key) {
                self.record_access(key);
            }
        }
        snapshot
    }

    /// Writes delegate unchanged; the host owns its environment.
    pub fn set_var(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    pub fn remove_var(&self, key: &str) {
        std::env::remove_var(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::patches::test_support::{recorded_effects, test_context_with_config};
    use crate::trace::EffectCategory;

    fn env_with_blocked(workspace: &std::path::Path, blocked: &[&str]) -> RecordedEnv {
        let mut config = PolicyConfig::default();
        config.workspace_root = workspace.to_string_lossy().into_owned();
        config.policy.sensitive.block_env = blocked.iter().map(|s| s.to_string()).collect();
        let ctx = test_context_with_config(workspace, config);
        RecordedEnv::new(ctx)
    }

    #[test]
    fn test_blocked_read_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["AGENTCI_TEST_SECRET_A"]);
        std::env::set_var("AGENTCI_TEST_SECRET_A", "v");

        let _ = env.var("AGENTCI_TEST_SECRET_A");

        let effects = recorded_effects(&env.ctx);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].category, EffectCategory::SensitiveAccess);
        let sensitive = effects[0].sensitive.as_ref().unwrap();
        assert_eq!(sensitive.access_type, SensitiveType::EnvVar);
        assert_eq!(sensitive.key_name.as_deref(), Some("AGENTCI_TEST_SECRET_A"));
        std::env::remove_var("AGENTCI_TEST_SECRET_A");
    }

    #[test]
    fn test_unblocked_read_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["AWS_*"]);
        let _ = env.var("PATH");
        assert!(recorded_effects(&env.ctx).is_empty());
    }

    #[test]
    fn test_blocked_read_recorded_even_when_unset() {
        // The access attempt is the effect, present or not.
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["AGENTCI_TEST_UNSET_B"]);
        assert!(env.var("AGENTCI_TEST_UNSET_B").is_err());
        assert_eq!(recorded_effects(&env.ctx).len(), 1);
    }

    #[test]
    fn test_glob_patterns_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["aws_*"]);
        let _ = env.var("AWS_SECRET_ACCESS_KEY");
        assert_eq!(recorded_effects(&env.ctx).len(), 1);
    }

    #[test]
    fn test_membership_probe_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["AGENTCI_TEST_SECRET_C"]);
        let _ = env.is_set("AGENTCI_TEST_SECRET_C");
        assert_eq!(recorded_effects(&env.ctx).len(), 1);
    }

    #[test]
    fn test_iteration_records_present_blocked_keys() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["AGENTCI_TEST_SECRET_D"]);
        std::env::set_var("AGENTCI_TEST_SECRET_D", "v");

        let snapshot = env.vars();
        assert!(snapshot.iter().any(|(k, _)| k == "AGENTCI_TEST_SECRET_D"));
        assert_eq!(recorded_effects(&env.ctx).len(), 1);
        std::env::remove_var("AGENTCI_TEST_SECRET_D");
    }

    #[test]
    fn test_writes_pass_through_unrecorded() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with_blocked(dir.path(), &["AGENTCI_TEST_SECRET_E"]);

        env.set_var("AGENTCI_TEST_SECRET_E", "v");
        assert_eq!(std::env::var("AGENTCI_TEST_SECRET_E").unwrap(), "v");
        env.remove_var("AGENTCI_TEST_SECRET_E");
        assert!(std::env::var("AGENTCI_TEST_SECRET_E").is_err());

        assert!(recorded_effects(&env.ctx).is_empty());
    }
}
