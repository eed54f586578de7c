//! Policy configuration loading and validation.
//!
//! Defines the YAML configuration schema for AgentCI. The root
//! [`PolicyConfig`] contains sections for normalization, redaction, and the
//! per-category policy rules (filesystem, network, exec, sensitive).
//!
//! All sections implement `Default` and `serde::Deserialize` with
//! `#[serde(default)]` so missing fields gracefully fall back to sensible
//! defaults. Config is loaded from `<workspace>/.agentci/config.yaml` by
//! default. A file that fails to parse or validate is reported and replaced
//! by the defaults — configuration problems never abort a run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::canonicalize::lexical_absolute;

/// Schema version this build understands.
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration struct, deserialized from YAML.
///
/// Load with [`PolicyConfig::load`], which merges the file over built-in
/// defaults and falls back to pure defaults on any validation failure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Workspace root; relative values are resolved against the project root
    /// at load time.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub policy: PolicySection,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_workspace_root() -> String {
    ".".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            workspace_root: default_workspace_root(),
            normalization: NormalizationConfig::default(),
            redaction: RedactionConfig::default(),
            policy: PolicySection::default(),
        }
    }
}

/// Normalization rule toggles, grouped per effect domain.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NormalizationConfig {
    #[serde(default)]
    pub filesystem: FsNormalization,
    #[serde(default)]
    pub network: NetNormalization,
    #[serde(default)]
    pub exec: ExecNormalization,
}

/// Filesystem path normalization rules.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FsNormalization {
    #[serde(default = "default_true")]
    pub collapse_temp: bool,
    #[serde(default = "default_true")]
    pub collapse_home: bool,
    /// Paths matching any of these globs are dropped from the signature.
    #[serde(default)]
    pub ignore_globs: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for FsNormalization {
    fn default() -> Self {
        Self {
            collapse_temp: true,
            collapse_home: true,
            ignore_globs: Vec::new(),
        }
    }
}

/// Network normalization rules.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetNormalization {
    #[serde(default = "default_true")]
    pub normalize_hosts: bool,
}

impl Default for NetNormalization {
    fn default() -> Self {
        Self { normalize_hosts: true }
    }
}

/// How much of a process argv survives into the signature.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArgvMode {
    /// Keep the full (masked) argv.
    Full,
    /// Keep `[argv0, hash, length]`.
    Hash,
    /// Keep only argv0.
    None,
}

/// Exec argv normalization rules.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecNormalization {
    #[serde(default = "default_argv_mode")]
    pub argv_mode: ArgvMode,
    /// Extra masking regexes applied on top of the built-in secret shapes.
    #[serde(default)]
    pub mask_patterns: Vec<String>,
}

fn default_argv_mode() -> ArgvMode {
    ArgvMode::Full
}

impl Default for ExecNormalization {
    fn default() -> Self {
        Self {
            argv_mode: ArgvMode::Full,
            mask_patterns: Vec::new(),
        }
    }
}

/// Post-normalization redaction rules.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RedactionConfig {
    /// Paths matching these globs become a redaction placeholder.
    #[serde(default)]
    pub redact_paths: Vec<String>,
    /// Hosts matching these globs become a redaction placeholder.
    /// (Accepts the legacy name `redact_hosts` at load time.)
    #[serde(default)]
    pub redact_urls: Vec<String>,
    /// Replace redacted values with a SHA-256 placeholder instead of a
    /// constant marker, so distinct values stay distinguishable.
    #[serde(default)]
    pub hash_values: bool,
}

/// Per-category policy rules.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PolicySection {
    #[serde(default)]
    pub filesystem: FsPolicy,
    #[serde(default)]
    pub network: NetPolicy,
    #[serde(default)]
    pub exec: ExecPolicy,
    #[serde(default)]
    pub sensitive: SensitivePolicy,
}

/// Filesystem write policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FsPolicy {
    #[serde(default = "default_allow_writes")]
    pub allow_writes: Vec<String>,
    #[serde(default)]
    pub block_writes: Vec<String>,
    #[serde(default)]
    pub enforce_allowlist: bool,
}

fn default_allow_writes() -> Vec<String> {
    vec!["**".to_string()]
}

impl Default for FsPolicy {
    fn default() -> Self {
        Self {
            allow_writes: default_allow_writes(),
            block_writes: Vec::new(),
            enforce_allowlist: false,
        }
    }
}

/// Network host / protocol / port policy.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NetPolicy {
    #[serde(default)]
    pub allow_hosts: Vec<String>,
    #[serde(default)]
    pub allow_etld_plus_1: Vec<String>,
    #[serde(default)]
    pub block_protocols: Vec<String>,
    #[serde(default)]
    pub allow_protocols: Vec<String>,
    #[serde(default)]
    pub allow_ports: Vec<u16>,
    #[serde(default)]
    pub block_ports: Vec<u16>,
    #[serde(default)]
    pub enforce_allowlist: bool,
}

/// Exec command policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecPolicy {
    #[serde(default = "default_allow_commands")]
    pub allow_commands: Vec<String>,
    #[serde(default)]
    pub block_commands: Vec<String>,
    #[serde(default)]
    pub enforce_allowlist: bool,
}

fn default_allow_commands() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            allow_commands: default_allow_commands(),
            block_commands: Vec::new(),
            enforce_allowlist: false,
        }
    }
}

/// Sensitive access detection rules.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensitivePolicy {
    /// Env var name globs whose reads are recorded and blocked.
    #[serde(default = "default_block_env")]
    pub block_env: Vec<String>,
    /// File path globs whose reads raise a sensitive-access event.
    #[serde(default)]
    pub block_file_globs: Vec<String>,
}

fn default_block_env() -> Vec<String> {
    vec![
        "AWS_SECRET_ACCESS_KEY".to_string(),
        "AWS_ACCESS_KEY_ID".to_string(),
    ]
}

impl Default for SensitivePolicy {
    fn default() -> Self {
        Self {
            block_env: default_block_env(),
            block_file_globs: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Load a config file, merge it over the built-in defaults, resolve the
    /// workspace root against `fallback_root`, and validate.
    ///
    /// Never fails: parse or validation errors are reported on stderr and
    /// the defaults are returned (with `workspace_root` still resolved).
    pub fn load(path: &Path, fallback_root: &Path) -> Self {
        let mut config = match Self::load_inner(path) {
            Ok(config) => {
                let issues = config.validate();
                if issues.is_empty() {
                    config
                } else {
                    for issue in &issues {
                        eprintln!("[agentci] config {}: {}", path.display(), issue);
                    }
                    eprintln!("[agentci] config invalid, falling back to defaults");
                    Self::default()
                }
            }
            Err(e) => {
                eprintln!(
                    "[agentci] failed to load config {}: {:#} — using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        };
        config.resolve_workspace_root(fallback_root);
        config
    }

    /// Load a config if the file exists, otherwise the defaults. Used by the
    /// recording path, where a missing config is the common case.
    pub fn load_or_default(path: Option<&Path>, fallback_root: &Path) -> Self {
        match path {
            Some(p) if p.is_file() => Self::load(p, fallback_root),
            _ => {
                let mut config = Self::default();
                config.resolve_workspace_root(fallback_root);
                config
            }
        }
    }

    fn load_inner(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let provided: serde_yaml::Value =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config YAML")?;
        let provided = apply_legacy_renames(provided);

        let mut merged = serde_yaml::to_value(Self::default())
            .with_context(|| "Failed to serialize default config")?;
        deep_merge(&mut merged, provided);

        let config: Self = serde_yaml::from_value(merged)
            .with_context(|| "Failed to deserialize merged config")?;
        Ok(config)
    }

    /// Semantic checks that the serde schema cannot express.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.version != CONFIG_VERSION {
            issues.push(format!(
                "unsupported schema version {} (expected {})",
                self.version, CONFIG_VERSION
            ));
        }
        if self.workspace_root.is_empty() {
            issues.push("workspace_root must not be empty".to_string());
        }
        for pattern in &self.normalization.exec.mask_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(format!("invalid mask pattern {:?}: {}", pattern, e));
            }
        }
        issues
    }

    fn resolve_workspace_root(&mut self, fallback_root: &Path) {
        let raw = Path::new(&self.workspace_root);
        let resolved = if raw.is_absolute() {
            lexical_absolute(raw)
        } else {
            lexical_absolute(&fallback_root.join(raw))
        };
        self.workspace_root = resolved.to_string_lossy().into_owned();
    }

    /// The resolved workspace root as a path.
    pub fn workspace_root_path(&self) -> PathBuf {
        PathBuf::from(&self.workspace_root)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).with_context(|| "Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

/// Map the legacy `redaction.redact_hosts` field onto `redact_urls` when
/// only the old name is present.
fn apply_legacy_renames(mut value: serde_yaml::Value) -> serde_yaml::Value {
    let redaction_key = serde_yaml::Value::from("redaction");
    let old_key = serde_yaml::Value::from("redact_hosts");
    let new_key = serde_yaml::Value::from("redact_urls");
    if let Some(redaction) = value
        .as_mapping_mut()
        .and_then(|m| m.get_mut(&redaction_key))
        .and_then(|r| r.as_mapping_mut())
    {
        if redaction.contains_key(&old_key) && !redaction.contains_key(&new_key) {
            if let Some(hosts) = redaction.remove(&old_key) {
                redaction.insert(new_key, hosts);
            }
        }
    }
    value
}

/// Recursively merge `overlay` onto `base`. Mappings merge key-wise; every
/// other value (including sequences) is replaced by the overlay.
fn deep_merge(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PolicyConfig::default();
        assert_eq!(config.version, 1);
        assert!(config.normalization.filesystem.collapse_temp);
        assert!(config.normalization.filesystem.collapse_home);
        assert!(config.normalization.network.normalize_hosts);
        assert_eq!(config.normalization.exec.argv_mode, ArgvMode::Full);
        assert_eq!(config.policy.filesystem.allow_writes, vec!["**"]);
        assert_eq!(config.policy.exec.allow_commands, vec!["*"]);
        assert!(config
            .policy
            .sensitive
            .block_env
            .contains(&"AWS_SECRET_ACCESS_KEY".to_string()));
        assert!(!config.policy.network.enforce_allowlist);
    }

    #[test]
    fn test_partial_yaml_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
policy:
  network:
    allow_hosts: ["api.example.com"]
    enforce_allowlist: true
"#,
        )
        .unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        assert_eq!(config.policy.network.allow_hosts, vec!["api.example.com"]);
        assert!(config.policy.network.enforce_allowlist);
        // Untouched sections keep their defaults.
        assert_eq!(config.policy.filesystem.allow_writes, vec!["**"]);
        assert!(config.normalization.filesystem.collapse_temp);
    }

    #[test]
    fn test_invalid_yaml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "policy: [not, a, mapping").unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        assert_eq!(config.policy.filesystem.allow_writes, vec!["**"]);
    }

    #[test]
    fn test_bad_argv_mode_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
normalization:
  exec:
    argv_mode: everything
"#,
        )
        .unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        assert_eq!(config.normalization.exec.argv_mode, ArgvMode::Full);
    }

    #[test]
    fn test_bad_version_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "version: 99\npolicy:\n  exec:\n    block_commands: [\"curl\"]\n",
        )
        .unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        assert!(config.policy.exec.block_commands.is_empty());
    }

    #[test]
    fn test_legacy_redact_hosts_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
redaction:
  redact_hosts: ["*.internal.example.com"]
"#,
        )
        .unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        assert_eq!(config.redaction.redact_urls, vec!["*.internal.example.com"]);
    }

    #[test]
    fn test_new_name_wins_over_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
redaction:
  redact_hosts: ["old.example.com"]
  redact_urls: ["new.example.com"]
"#,
        )
        .unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        assert_eq!(config.redaction.redact_urls, vec!["new.example.com"]);
    }

    #[test]
    fn test_relative_workspace_root_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "workspace_root: sub/project\n").unwrap();

        let config = PolicyConfig::load(&path, dir.path());
        let root = config.workspace_root_path();
        assert!(root.is_absolute());
        assert!(root.ends_with("sub/project"));
    }

    #[test]
    fn test_missing_file_gives_defaults_with_resolved_root() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            PolicyConfig::load_or_default(Some(&dir.path().join("nope.yaml")), dir.path());
        assert!(config.workspace_root_path().is_absolute());
        assert_eq!(config.policy.exec.allow_commands, vec!["*"]);
    }

    #[test]
    fn test_invalid_mask_pattern_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
normalization:
  exec:
    mask_patterns: ["(unclosed"]
policy:
  exec:
    block_commands: ["curl"]
"#,
        )
        .unwrap();

        // Invalid pattern invalidates the whole file: defaults win.
        let config = PolicyConfig::load(&path, dir.path());
        assert!(config.policy.exec.block_commands.is_empty());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = PolicyConfig::default();
        config.policy.network.allow_hosts = vec!["api.example.com".to_string()];
        config.save(&path).unwrap();

        let reloaded = PolicyConfig::load(&path, dir.path());
        assert_eq!(reloaded.policy.network.allow_hosts, vec!["api.example.com"]);
    }
}
