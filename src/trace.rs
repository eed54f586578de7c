//! Trace event data model and JSONL parsing.
//!
//! One [`TraceEvent`] per line, UTF-8, LF separated. The reader is tolerant
//! by contract: blank lines, malformed JSON, records without a `type`, and a
//! torn trailing line (host crashed mid-append) are all skipped, never
//! errors. Event payloads are carried as raw JSON values; the typed effect
//! structs parse out of them on demand so one malformed payload never
//! poisons a whole log.

use anyhow::{Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Record type discriminant, one per trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Lifecycle,
    Effect,
    ToolCall,
    ToolResult,
}

/// One line of the JSONL trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Random 128-bit identifier, hex-encoded.
    pub id: String,
    /// Milliseconds since the Unix epoch. Monotonically increasing per
    /// thread, not guaranteed strictly monotonic across threads.
    pub timestamp: f64,
    pub run_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Effect category discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCategory {
    FsWrite,
    FsRead,
    FsDelete,
    NetOutbound,
    Exec,
    SensitiveAccess,
}

/// How the effect was established. Recorded events are `observed`;
/// adapter-emitted tool events are `declared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Observed,
    Declared,
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Filesystem effect payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FsEffect {
    pub path_requested: String,
    pub path_resolved: String,
    pub is_workspace_local: bool,
}

/// Outbound network effect payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetEffect {
    pub host_raw: String,
    pub host_etld_plus_1: String,
    pub method: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Subprocess execution effect payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecEffect {
    pub command_raw: String,
    pub argv_normalized: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveType {
    EnvVar,
    FileRead,
}

/// Sensitive access effect payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensitiveEffect {
    #[serde(rename = "type")]
    pub access_type: SensitiveType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

/// Effect event payload: a category/kind pair plus the category-specific
/// record nested under its discriminant key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectData {
    pub category: EffectCategory,
    pub kind: EffectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<NetEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<SensitiveEffect>,
}

impl EffectData {
    pub fn fs(category: EffectCategory, fs: FsEffect) -> Self {
        Self {
            category,
            kind: EffectKind::Observed,
            fs: Some(fs),
            net: None,
            exec: None,
            sensitive: None,
        }
    }

    pub fn net(net: NetEffect) -> Self {
        Self {
            category: EffectCategory::NetOutbound,
            kind: EffectKind::Observed,
            fs: None,
            net: Some(net),
            exec: None,
            sensitive: None,
        }
    }

    pub fn exec(exec: ExecEffect) -> Self {
        Self {
            category: EffectCategory::Exec,
            kind: EffectKind::Observed,
            fs: None,
            net: None,
            exec: Some(exec),
            sensitive: None,
        }
    }

    pub fn sensitive(sensitive: SensitiveEffect) -> Self {
        Self {
            category: EffectCategory::SensitiveAccess,
            kind: EffectKind::Observed,
            fs: None,
            net: None,
            exec: None,
            sensitive: Some(sensitive),
        }
    }

    /// Parse an effect payload out of a raw event `data` value.
    /// Returns `None` for payloads that do not fit the schema.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Lifecycle stage carried by `lifecycle` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Start,
    Stop,
    Error,
}

/// Generate a random 128-bit event id, hex-encoded.
pub fn new_event_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current wall-clock time in float milliseconds since the epoch.
pub fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

/// Build a trace event stamped with a fresh id and the current time.
pub fn make_event(
    run_id: &str,
    event_type: EventType,
    data: serde_json::Value,
    metadata: Option<serde_json::Value>,
) -> TraceEvent {
    TraceEvent {
        id: new_event_id(),
        timestamp: now_millis(),
        run_id: run_id.to_string(),
        event_type,
        data,
        metadata,
    }
}

/// Parse trace bytes into events, skipping anything that does not fit.
/// Terminates and returns a list for any byte input; never fails.
pub fn parse_trace(bytes: &[u8]) -> Vec<TraceEvent> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let value: serde_json::Value = serde_json::from_str(line).ok()?;
            if !value.get("type").map(|t| t.is_string()).unwrap_or(false) {
                return None;
            }
            serde_json::from_value::<TraceEvent>(value).ok()
        })
        .collect()
}

/// Read and parse a trace file. Only the file read itself can fail;
/// content problems degrade to skipped records.
pub fn read_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read trace: {}", path.display()))?;
    Ok(parse_trace(&bytes))
}
