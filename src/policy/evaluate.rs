// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Policy evaluation: signatures (and single effects, for the enforcer)
//! against a [`PolicyConfig`], producing findings.
//!
//! When multiple rules apply, every finding is reported; the summary
//! verdict is the highest severity present. BLOCK drives exit code 1.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::canonicalize::{command_basename, lexical_absolute, to_etld_plus_1};
use crate::config::PolicyConfig;
use crate::policy::globs;
use crate::signature::EffectSignature;
use crate::trace::{EffectCategory, EffectData, SensitiveType};

/// Finding severity, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Block => write!(f, "BLOCK"),
        }
    }
}

/// Which policy family produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Filesystem,
    Network,
    Exec,
    Sensitive,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingCategory::Filesystem => write!(f, "filesystem"),
            FindingCategory::Network => write!(f, "network"),
            FindingCategory::Exec => write!(f, "exec"),
            FindingCategory::Sensitive => write!(f, "sensitive"),
        }
    }
}

/// One policy finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl PolicyFinding {
    fn new(severity: Severity, category: FindingCategory, message: String) -> Self {
        Self {
            severity,
            category,
            message,
            suggestion: None,
            evidence: None,
        }
    }

    fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }

    fn with_evidence(mut self, evidence: &str) -> Self {
        self.evidence = Some(evidence.to_string());
        self
    }
}

/// Summary verdict over a finding list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Block,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Warn => write!(f, "WARN"),
            Verdict::Block => write!(f, "BLOCK"),
        }
    }
}

/// Evaluate a signature under a policy. Returns all findings.
pub fn evaluate(signature: &EffectSignature, config: &PolicyConfig) -> Vec<PolicyFinding> {
    let mut findings = Vec::new();

    for path in &signature.effects.fs_writes {
        if let Some(finding) = check_write_path(path, config) {
            findings.push(finding);
        }
    }

    for host in &signature.effects.net_hosts {
        if let Some(finding) = check_host(host, config) {
            findings.push(finding);
        }
    }
    for protocol in &signature.effects.net_protocols {
        if let Some(finding) = check_protocol(protocol, config) {
            findings.push(finding);
        }
    }
    for port in &signature.effects.net_ports {
        if let Some(finding) = check_port(*port, config) {
            findings.push(finding);
        }
    }

    for command in &signature.effects.exec_commands {
        if let Some(finding) = check_command(command, config) {
            findings.push(finding);
        }
    }

    for key in &signature.effects.sensitive_keys_accessed {
        if let Some(finding) = check_sensitive_key(key, config) {
            findings.push(finding);
        }
    }

    findings
}

/// Evaluate a single effect event, for record-time enforcement. Mirrors
/// [`evaluate`] scoped to one event.
pub fn evaluate_effect(effect: &EffectData, config: &PolicyConfig) -> Vec<PolicyFinding> {
    let mut findings = Vec::new();
    match effect.category {
        EffectCategory::FsWrite => {
            if let Some(fs) = &effect.fs {
                if let Some(finding) = check_write_path(&fs.path_resolved, config) {
                    findings.push(finding);
                }
            }
        }
        EffectCategory::NetOutbound => {
            if let Some(net) = &effect.net {
                if let Some(finding) = check_host(&net.host_raw, config) {
                    findings.push(finding);
                }
                if let Some(finding) = check_protocol(net.protocol.as_str(), config) {
                    findings.push(finding);
                }
                if let Some(port) = net.port {
                    if let Some(finding) = check_port(port, config) {
                        findings.push(finding);
                    }
                }
            }
        }
        EffectCategory::Exec => {
            if let Some(exec) = &effect.exec {
                let command = exec
                    .argv_normalized
                    .first()
                    .map(|a| command_basename(a))
                    .unwrap_or_else(|| command_basename(&exec.command_raw));
                if let Some(finding) = check_command(&command, config) {
                    findings.push(finding);
                }
            }
        }
        EffectCategory::SensitiveAccess => {
            if let Some(sensitive) = &effect.sensitive {
                if let Some(key) = &sensitive.key_name {
                    let finding = match sensitive.access_type {
                        SensitiveType::EnvVar => check_blocked_env(key, config),
                        SensitiveType::FileRead => check_blocked_file(key, config),
                    };
                    if let Some(finding) = finding {
                        findings.push(finding);
                    }
                }
            }
        }
        EffectCategory::FsRead | EffectCategory::FsDelete => {}
    }
    findings
}

/// Summary severity: BLOCK if any finding blocks, else WARN if any warns,
/// else PASS.
pub fn verdict(findings: &[PolicyFinding]) -> Verdict {
    if findings.iter().any(|f| f.severity == Severity::Block) {
        Verdict::Block
    } else if findings.iter().any(|f| f.severity == Severity::Warn) {
        Verdict::Warn
    } else {
        Verdict::Pass
    }
}

/// Process exit code for a verdict: 1 on BLOCK, 0 otherwise.
pub fn exit_code(verdict: Verdict) -> i32 {
    match verdict {
        Verdict::Block => 1,
        _ => 0,
    }
}

// ─── Filesystem rules ───────────────────────────────────────────────────────

fn check_write_path(path: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    let fs_policy = &config.policy.filesystem;
    let workspace = config.workspace_root_path();

    let expanded = globs::expand_tilde(path);
    let candidate = if Path::new(&expanded).is_absolute() {
        let abs = lexical_absolute(Path::new(&expanded));
        match abs.strip_prefix(&workspace) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => {
                return Some(
                    PolicyFinding::new(
                        Severity::Block,
                        FindingCategory::Filesystem,
                        format!("write resolved outside workspace root: {}", path),
                    )
                    .with_evidence(path),
                );
            }
        }
    } else {
        path.to_string()
    };

    if fs_policy
        .block_writes
        .iter()
        .any(|p| globs::path_glob_match(p, &candidate))
    {
        return Some(
            PolicyFinding::new(
                Severity::Block,
                FindingCategory::Filesystem,
                format!("write to blocked path: {}", candidate),
            )
            .with_evidence(path),
        );
    }

    let allowed = fs_policy
        .allow_writes
        .iter()
        .any(|p| globs::path_glob_match(p, &candidate));
    if !allowed {
        let severity = if fs_policy.enforce_allowlist {
            Severity::Block
        } else {
            Severity::Warn
        };
        return Some(
            PolicyFinding::new(
                severity,
                FindingCategory::Filesystem,
                format!("write not covered by allow list: {}", candidate),
            )
            .with_suggestion("add the path to policy.filesystem.allow_writes if expected")
            .with_evidence(path),
        );
    }
    None
}

// ─── Network rules ──────────────────────────────────────────────────────────

fn has_network_allowlist(config: &PolicyConfig) -> bool {
    let net = &config.policy.network;
    !net.allow_hosts.is_empty() || !net.allow_etld_plus_1.is_empty()
}

fn check_host(host: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    // Redaction placeholders carry no matchable host.
    if host.starts_with('<') {
        return None;
    }
    let net = &config.policy.network;
    let host_ok = globs::host_allowed(host, &net.allow_hosts);
    let etld = to_etld_plus_1(host);
    let etld_ok = net
        .allow_etld_plus_1
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&etld));

    if !host_ok && !etld_ok && (net.enforce_allowlist || has_network_allowlist(config)) {
        return Some(
            PolicyFinding::new(
                Severity::Block,
                FindingCategory::Network,
                format!("host {} is not in the allow list", host),
            )
            .with_suggestion("add the host to policy.network.allow_hosts if expected")
            .with_evidence(host),
        );
    }
    None
}

fn check_protocol(protocol: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    let net = &config.policy.network;
    if net
        .block_protocols
        .iter()
        .any(|p| p.eq_ignore_ascii_case(protocol))
    {
        return Some(PolicyFinding::new(
            Severity::Block,
            FindingCategory::Network,
            format!("blocked protocol: {}", protocol),
        ));
    }
    if !net.allow_protocols.is_empty()
        && !net
            .allow_protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
    {
        return Some(PolicyFinding::new(
            Severity::Block,
            FindingCategory::Network,
            format!("protocol {} is not in the allow list", protocol),
        ));
    }
    None
}

fn check_port(port: u16, config: &PolicyConfig) -> Option<PolicyFinding> {
    let net = &config.policy.network;
    if net.block_ports.contains(&port) {
        return Some(PolicyFinding::new(
            Severity::Block,
            FindingCategory::Network,
            format!("blocked port: {}", port),
        ));
    }
    if !net.allow_ports.is_empty() && !net.allow_ports.contains(&port) {
        return Some(PolicyFinding::new(
            Severity::Block,
            FindingCategory::Network,
            format!("port {} is not in the allow list", port),
        ));
    }
    None
}

// ─── Exec rules ─────────────────────────────────────────────────────────────

fn check_command(command: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    let exec = &config.policy.exec;
    if exec
        .block_commands
        .iter()
        .any(|p| globs::ci_glob_match(p, command))
    {
        return Some(
            PolicyFinding::new(
                Severity::Block,
                FindingCategory::Exec,
                format!("blocked command executed: {}", command),
            )
            .with_evidence(command),
        );
    }
    let allowed = exec
        .allow_commands
        .iter()
        .any(|p| globs::ci_glob_match(p, command));
    if !allowed {
        let severity = if exec.enforce_allowlist {
            Severity::Block
        } else {
            Severity::Warn
        };
        return Some(
            PolicyFinding::new(
                severity,
                FindingCategory::Exec,
                format!("command not covered by allow list: {}", command),
            )
            .with_suggestion("add the command to policy.exec.allow_commands if expected")
            .with_evidence(command),
        );
    }
    None
}

// ─── Sensitive rules ────────────────────────────────────────────────────────

fn check_sensitive_key(key: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    check_blocked_env(key, config).or_else(|| check_blocked_file(key, config))
}

fn check_blocked_env(key: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    let sensitive = &config.policy.sensitive;
    if sensitive
        .block_env
        .iter()
        .any(|p| globs::ci_glob_match(p, key))
    {
        return Some(
            PolicyFinding::new(
                Severity::Block,
                FindingCategory::Sensitive,
                format!("sensitive env var {} was accessed", key),
            )
            .with_evidence(key),
        );
    }
    None
}

fn check_blocked_file(key: &str, config: &PolicyConfig) -> Option<PolicyFinding> {
    let sensitive = &config.policy.sensitive;
    if sensitive
        .block_file_globs
        .iter()
        .any(|p| globs::path_glob_match(p, key))
    {
        return Some(
            PolicyFinding::new(
                Severity::Block,
                FindingCategory::Sensitive,
                format!("sensitive file access: {}", key),
            )
            .with_evidence(key),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureEffects;

    fn signature_with(f: impl FnOnce(&mut SignatureEffects)) -> EffectSignature {
        let mut sig = EffectSignature::empty("0.0.0-test");
        f(&mut sig.effects);
        sig
    }

    fn config_with(f: impl FnOnce(&mut PolicyConfig)) -> PolicyConfig {
        let mut config = PolicyConfig::default();
        config.workspace_root = "/workspace".to_string();
        f(&mut config);
        config
    }

    #[test]
    fn test_clean_signature_passes() {
        let sig = signature_with(|e| {
            e.fs_writes = vec!["src/index.ts".to_string()];
            e.net_hosts = vec!["api.good.com".to_string()];
            e.net_etld_plus_1 = vec!["good.com".to_string()];
            e.exec_commands = vec!["node".to_string()];
        });
        let config = config_with(|c| {
            c.policy.network.allow_hosts = vec!["api.good.com".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert!(
            findings.iter().all(|f| f.severity != Severity::Block),
            "unexpected findings: {:?}",
            findings
        );
        assert_eq!(verdict(&findings), Verdict::Pass);
        assert_eq!(exit_code(verdict(&findings)), 0);
    }

    #[test]
    fn test_sensitive_env_block() {
        let sig = signature_with(|e| {
            e.sensitive_keys_accessed = vec!["AWS_SECRET_ACCESS_KEY".to_string()];
        });
        let config = config_with(|c| {
            c.policy.sensitive.block_env = vec!["AWS_SECRET_ACCESS_KEY".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.severity, Severity::Block);
        assert_eq!(f.category, FindingCategory::Sensitive);
        assert!(f.message.contains("env var"));
        assert!(f.message.contains("AWS_SECRET_ACCESS_KEY"));
        assert_eq!(verdict(&findings), Verdict::Block);
        assert_eq!(exit_code(Verdict::Block), 1);
    }

    #[test]
    fn test_sensitive_env_glob_case_insensitive() {
        let sig = signature_with(|e| {
            e.sensitive_keys_accessed = vec!["aws_session_token".to_string()];
        });
        let config = config_with(|c| {
            c.policy.sensitive.block_env = vec!["AWS_*".to_string()];
        });
        assert_eq!(verdict(&evaluate(&sig, &config)), Verdict::Block);
    }

    #[test]
    fn test_sensitive_file_glob() {
        let sig = signature_with(|e| {
            e.sensitive_keys_accessed = vec!["/etc/passwd".to_string()];
        });
        let config = config_with(|c| {
            c.policy.sensitive.block_env = vec![];
            c.policy.sensitive.block_file_globs = vec!["/etc/*".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("file access"));
    }

    #[test]
    fn test_write_outside_workspace_blocks() {
        let sig = signature_with(|e| {
            e.fs_writes = vec!["/etc/cron.d/job".to_string()];
        });
        let config = config_with(|_| {});
        let findings = evaluate(&sig, &config);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Block);
        assert!(findings[0].message.contains("outside workspace root"));
    }

    #[test]
    fn test_absolute_write_inside_workspace_matches_relative_globs() {
        let sig = signature_with(|e| {
            e.fs_writes = vec!["/workspace/src/a.rs".to_string()];
        });
        let config = config_with(|c| {
            c.policy.filesystem.allow_writes = vec!["src/**".to_string()];
            c.policy.filesystem.enforce_allowlist = true;
        });
        assert_eq!(verdict(&evaluate(&sig, &config)), Verdict::Pass);
    }

    #[test]
    fn test_blocked_write_glob() {
        let sig = signature_with(|e| {
            e.fs_writes = vec![".git/hooks/pre-commit".to_string()];
        });
        let config = config_with(|c| {
            c.policy.filesystem.block_writes = vec![".git/**".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings[0].severity, Severity::Block);
        assert!(findings[0].message.contains("blocked path"));
    }

    #[test]
    fn test_write_not_allowed_warns_without_enforce() {
        let sig = signature_with(|e| {
            e.fs_writes = vec!["dist/out.js".to_string()];
        });
        let config = config_with(|c| {
            c.policy.filesystem.allow_writes = vec!["src/**".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings[0].severity, Severity::Warn);
        assert_eq!(verdict(&findings), Verdict::Warn);
        assert_eq!(exit_code(Verdict::Warn), 0);
    }

    #[test]
    fn test_write_not_allowed_blocks_with_enforce() {
        let sig = signature_with(|e| {
            e.fs_writes = vec!["dist/out.js".to_string()];
        });
        let config = config_with(|c| {
            c.policy.filesystem.allow_writes = vec!["src/**".to_string()];
            c.policy.filesystem.enforce_allowlist = true;
        });
        assert_eq!(verdict(&evaluate(&sig, &config)), Verdict::Block);
    }

    #[test]
    fn test_host_blocked_under_enforce_with_empty_allowlist() {
        // Rogue-behavior scenario: enforce_allowlist with no allow entries
        // blocks every host.
        let sig = signature_with(|e| {
            e.net_hosts = vec!["evil.com".to_string()];
        });
        let config = config_with(|c| {
            c.policy.network.enforce_allowlist = true;
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Block);
        assert!(findings[0].message.contains("evil.com"));
    }

    #[test]
    fn test_host_implicit_allowlist_enforcement() {
        // A non-empty allow list is enforced even without enforce_allowlist.
        let sig = signature_with(|e| {
            e.net_hosts = vec!["evil.com".to_string(), "api.example.com".to_string()];
        });
        let config = config_with(|c| {
            c.policy.network.allow_hosts = vec!["api.example.com".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("evil.com"));
    }

    #[test]
    fn test_host_allowed_by_etld() {
        let sig = signature_with(|e| {
            e.net_hosts = vec!["api.example.com".to_string()];
        });
        let config = config_with(|c| {
            c.policy.network.allow_etld_plus_1 = vec!["example.com".to_string()];
        });
        assert_eq!(verdict(&evaluate(&sig, &config)), Verdict::Pass);
    }

    #[test]
    fn test_host_no_allowlist_no_enforce_passes() {
        let sig = signature_with(|e| {
            e.net_hosts = vec!["anything.example.com".to_string()];
        });
        let config = config_with(|_| {});
        assert_eq!(verdict(&evaluate(&sig, &config)), Verdict::Pass);
    }

    #[test]
    fn test_protocol_rules() {
        let sig = signature_with(|e| {
            e.net_protocols = vec!["http".to_string()];
        });
        let blocked = config_with(|c| {
            c.policy.network.block_protocols = vec!["http".to_string()];
        });
        assert_eq!(verdict(&evaluate(&sig, &blocked)), Verdict::Block);

        let allow_only_https = config_with(|c| {
            c.policy.network.allow_protocols = vec!["https".to_string()];
        });
        assert_eq!(verdict(&evaluate(&sig, &allow_only_https)), Verdict::Block);

        let open = config_with(|_| {});
        assert_eq!(verdict(&evaluate(&sig, &open)), Verdict::Pass);
    }

    #[test]
    fn test_port_rules() {
        let sig = signature_with(|e| {
            e.net_ports = vec![8080];
        });
        let blocked = config_with(|c| {
            c.policy.network.block_ports = vec![8080];
        });
        assert_eq!(verdict(&evaluate(&sig, &blocked)), Verdict::Block);

        let allow_443 = config_with(|c| {
            c.policy.network.allow_ports = vec![443];
        });
        assert_eq!(verdict(&evaluate(&sig, &allow_443)), Verdict::Block);

        let allow_8080 = config_with(|c| {
            c.policy.network.allow_ports = vec![443, 8080];
        });
        assert_eq!(verdict(&evaluate(&sig, &allow_8080)), Verdict::Pass);
    }

    #[test]
    fn test_blocked_command() {
        let sig = signature_with(|e| {
            e.exec_commands = vec!["nc".to_string()];
        });
        let config = config_with(|c| {
            c.policy.exec.block_commands = vec!["nc".to_string()];
        });
        let findings = evaluate(&sig, &config);
        assert_eq!(findings[0].severity, Severity::Block);
        assert!(findings[0].message.contains("nc"));
    }

    #[test]
    fn test_command_allowlist_warn_vs_block() {
        let sig = signature_with(|e| {
            e.exec_commands = vec!["python3".to_string()];
        });
        let warn_config = config_with(|c| {
            c.policy.exec.allow_commands = vec!["node".to_string()];
        });
        assert_eq!(verdict(&evaluate(&sig, &warn_config)), Verdict::Warn);

        let block_config = config_with(|c| {
            c.policy.exec.allow_commands = vec!["node".to_string()];
            c.policy.exec.enforce_allowlist = true;
        });
        assert_eq!(verdict(&evaluate(&sig, &block_config)), Verdict::Block);
    }

    #[test]
    fn test_redacted_host_skipped() {
        let sig = signature_with(|e| {
            e.net_hosts = vec!["<redacted:host>".to_string()];
        });
        let config = config_with(|c| {
            c.policy.network.enforce_allowlist = true;
        });
        assert_eq!(verdict(&evaluate(&sig, &config)), Verdict::Pass);
    }

    #[test]
    fn test_evaluate_effect_exec_block() {
        use crate::trace::{EffectData, ExecEffect};
        let effect = EffectData::exec(ExecEffect {
            command_raw: "/usr/bin/nc".to_string(),
            argv_normalized: vec!["nc".to_string(), "evil.com".to_string()],
        });
        let config = config_with(|c| {
            c.policy.exec.block_commands = vec!["nc".to_string()];
        });
        let findings = evaluate_effect(&effect, &config);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Block);
    }

    #[test]
    fn test_evaluate_effect_sensitive_env() {
        use crate::trace::{EffectData, SensitiveEffect};
        let effect = EffectData::sensitive(SensitiveEffect {
            access_type: SensitiveType::EnvVar,
            key_name: Some("AWS_SECRET_ACCESS_KEY".to_string()),
        });
        let config = config_with(|_| {});
        let findings = evaluate_effect(&effect, &config);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("env var"));
    }

    #[test]
    fn test_evaluate_effect_fs_read_is_quiet() {
        use crate::trace::{EffectData, FsEffect};
        let effect = EffectData::fs(
            EffectCategory::FsRead,
            FsEffect {
                path_requested: "/etc/hosts".to_string(),
                path_resolved: "/etc/hosts".to_string(),
                is_workspace_local: false,
            },
        );
        let config = config_with(|_| {});
        assert!(evaluate_effect(&effect, &config).is_empty());
    }
}
