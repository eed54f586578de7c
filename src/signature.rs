// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Effect signature: the canonical, deterministic projection of a trace.
//!
//! The builder reads a JSONL trace tolerantly, applies the normalization
//! rules, and accumulates ten sorted, deduplicated effect lists. For a
//! given (log, config, tool version) the effect lists are byte-identical
//! across invocations: accumulation goes through `BTreeSet`s, so ordering
//! never depends on event order, and `meta.platform` / `runtime_version`
//! come from the log's own lifecycle record when present.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;

use crate::canonicalize::{command_basename, to_etld_plus_1, to_workspace_path};
use crate::config::PolicyConfig;
use crate::normalize::NormalizeRules;
use crate::trace::{self, EffectCategory, EffectData, EventType, LifecycleStage, TraceEvent};

pub const SIGNATURE_VERSION: &str = "1.0";
pub const NORMALIZATION_RULES_VERSION: &str = "1.0";
/// Adapter tag for plain recorded runs.
pub const ADAPTER_RECORDED: &str = "rust-hook";
/// Adapter tag when the log also carries tool_call / tool_result events.
pub const ADAPTER_TOOL_EVENTS: &str = "openclaw+rust-hook";

/// Signature metadata block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignatureMeta {
    pub signature_version: String,
    pub normalization_rules_version: String,
    pub tool_version: String,
    pub platform: String,
    pub adapter: String,
    pub scenario_id: String,
    pub runtime_version: String,
}

/// The ten effect lists. Each is sorted with no duplicates; `net_ports`
/// numerically, the rest lexicographically. Lists missing from older
/// signature files deserialize as empty (legacy read path).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignatureEffects {
    #[serde(default)]
    pub fs_writes: Vec<String>,
    #[serde(default)]
    pub fs_reads_external: Vec<String>,
    #[serde(default)]
    pub fs_deletes: Vec<String>,
    #[serde(default)]
    pub net_protocols: Vec<String>,
    #[serde(default)]
    pub net_etld_plus_1: Vec<String>,
    #[serde(default)]
    pub net_hosts: Vec<String>,
    #[serde(default)]
    pub net_ports: Vec<u16>,
    #[serde(default)]
    pub exec_commands: Vec<String>,
    #[serde(default)]
    pub exec_argv: Vec<String>,
    #[serde(default)]
    pub sensitive_keys_accessed: Vec<String>,
}

/// A canonical effect signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectSignature {
    pub meta: SignatureMeta,
    pub effects: SignatureEffects,
}

/// Inputs to the builder beyond the trace and config.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub tool_version: String,
    pub scenario_id: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            scenario_id: None,
        }
    }
}

impl EffectSignature {
    /// A signature with empty effect lists, as produced for an empty log.
    pub fn empty(tool_version: &str) -> Self {
        Self {
            meta: SignatureMeta {
                signature_version: SIGNATURE_VERSION.to_string(),
                normalization_rules_version: NORMALIZATION_RULES_VERSION.to_string(),
                tool_version: tool_version.to_string(),
                platform: current_platform(),
                adapter: ADAPTER_RECORDED.to_string(),
                scenario_id: "default".to_string(),
                runtime_version: "unknown".to_string(),
            },
            effects: SignatureEffects::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .with_context(|| "Failed to serialize signature")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write signature: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read signature: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse signature: {}", path.display()))
    }

    /// SHA-256 over the canonical JSON serialization, hex-encoded.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }
}

/// Build a signature from a trace file.
pub fn build_signature(
    trace_path: &Path,
    config: &PolicyConfig,
    options: &BuildOptions,
) -> Result<EffectSignature> {
    let events = trace::read_trace(trace_path)?;
    Ok(build_from_events(&events, config, options))
}

/// Build a signature from already-parsed events.
pub fn build_from_events(
    events: &[TraceEvent],
    config: &PolicyConfig,
    options: &BuildOptions,
) -> EffectSignature {
    let rules = NormalizeRules::from_config(config);
    let workspace = config.workspace_root_path();

    let mut fs_writes = BTreeSet::new();
    let mut fs_reads_external = BTreeSet::new();
    let mut fs_deletes = BTreeSet::new();
    let mut net_protocols = BTreeSet::new();
    let mut net_etld_plus_1 = BTreeSet::new();
    let mut net_hosts = BTreeSet::new();
    let mut net_ports: BTreeSet<u16> = BTreeSet::new();
    let mut exec_commands = BTreeSet::new();
    let mut exec_argv = BTreeSet::new();
    let mut sensitive_keys = BTreeSet::new();

    let mut has_tool_events = false;
    let mut platform: Option<String> = None;
    let mut runtime_version: Option<String> = None;

    for event in events {
        match event.event_type {
            EventType::ToolCall | EventType::ToolResult => {
                has_tool_events = true;
                continue;
            }
            EventType::Lifecycle => {
                let stage = event
                    .data
                    .get("stage")
                    .and_then(|s| serde_json::from_value::<LifecycleStage>(s.clone()).ok());
                if stage == Some(LifecycleStage::Start) {
                    if let Some(meta) = &event.metadata {
                        if platform.is_none() {
                            platform = meta
                                .get("platform")
                                .and_then(|v| v.as_str())
                                .map(str::to_string);
                        }
                        if runtime_version.is_none() {
                            runtime_version = meta
                                .get("runtime_version")
                                .and_then(|v| v.as_str())
                                .map(str::to_string);
                        }
                    }
                }
                continue;
            }
            EventType::Effect => {}
        }

        let Some(effect) = EffectData::from_value(&event.data) else {
            continue;
        };
        match effect.category {
            EffectCategory::FsWrite | EffectCategory::FsDelete => {
                let Some(fs) = &effect.fs else { continue };
                let (value, _) = to_workspace_path(Path::new(&fs.path_resolved), &workspace);
                if let Some(normalized) = rules.normalize_fs_path(&value) {
                    if !normalized.is_empty() {
                        if effect.category == EffectCategory::FsWrite {
                            fs_writes.insert(normalized);
                        } else {
                            fs_deletes.insert(normalized);
                        }
                    }
                }
            }
            EffectCategory::FsRead => {
                let Some(fs) = &effect.fs else { continue };
                let (value, is_external) =
                    to_workspace_path(Path::new(&fs.path_resolved), &workspace);
                if is_external || !fs.is_workspace_local {
                    if let Some(normalized) = rules.normalize_fs_path(&value) {
                        if !normalized.is_empty() {
                            fs_reads_external.insert(normalized);
                        }
                    }
                }
            }
            EffectCategory::NetOutbound => {
                let Some(net) = &effect.net else { continue };
                if let Some(host) = rules.normalize_host(&net.host_raw) {
                    let etld = if host.starts_with('<') {
                        host.clone()
                    } else {
                        to_etld_plus_1(&host)
                    };
                    net_hosts.insert(host);
                    if !etld.is_empty() {
                        net_etld_plus_1.insert(etld);
                    }
                }
                net_protocols.insert(net.protocol.as_str().to_string());
                if let Some(port) = net.port {
                    net_ports.insert(port);
                }
            }
            EffectCategory::Exec => {
                let Some(exec) = &effect.exec else { continue };
                let argv = rules.normalize_argv(&exec.argv_normalized);
                let command = argv
                    .first()
                    .map(|a| command_basename(a))
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| command_basename(&exec.command_raw));
                if !command.is_empty() {
                    exec_commands.insert(command);
                }
                if !argv.is_empty() {
                    if let Ok(serialized) = serde_json::to_string(&argv) {
                        exec_argv.insert(serialized);
                    }
                }
            }
            EffectCategory::SensitiveAccess => {
                let Some(sensitive) = &effect.sensitive else { continue };
                if let Some(key) = &sensitive.key_name {
                    if !key.is_empty() {
                        sensitive_keys.insert(key.clone());
                    }
                }
            }
        }
    }

    let adapter = if has_tool_events {
        ADAPTER_TOOL_EVENTS
    } else {
        ADAPTER_RECORDED
    };

    EffectSignature {
        meta: SignatureMeta {
            signature_version: SIGNATURE_VERSION.to_string(),
            normalization_rules_version: NORMALIZATION_RULES_VERSION.to_string(),
            tool_version: options.tool_version.clone(),
            platform: platform.unwrap_or_else(current_platform),
            adapter: adapter.to_string(),
            scenario_id: options
                .scenario_id
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            runtime_version: runtime_version.unwrap_or_else(|| "unknown".to_string()),
        },
        effects: SignatureEffects {
            fs_writes: fs_writes.into_iter().collect(),
            fs_reads_external: fs_reads_external.into_iter().collect(),
            fs_deletes: fs_deletes.into_iter().collect(),
            net_protocols: net_protocols.into_iter().collect(),
            net_etld_plus_1: net_etld_plus_1.into_iter().collect(),
            net_hosts: net_hosts.into_iter().collect(),
            net_ports: net_ports.into_iter().collect(),
            exec_commands: exec_commands.into_iter().collect(),
            exec_argv: exec_argv.into_iter().collect(),
            sensitive_keys_accessed: sensitive_keys.into_iter().collect(),
        },
    }
}

fn current_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
