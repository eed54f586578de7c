// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Interception wrappers for file, subprocess, network, and sensitive-env
//! operations.
//!
//! Rust has no runtime binding replacement, so the recorder delivers the
//! patch contract as an explicit wrapper facade the host links against.
//! Every wrapper follows the same discipline:
//!
//! - if the writer's bypass flag is set, call through without recording;
//! - delegate to the original operation (`std::fs`, `tokio::fs`,
//!   `std::process`, `hyper`, `std::env`);
//! - emit the effect only when the delegated operation succeeds — async
//!   variants emit on resolve, errors propagate to the host unchanged;
//! - swallow every failure on the emission path (fail-open).
//!
//! Facades are constructed by the recorder in a fixed order: env-sensitive
//! first (later facades may read environment variables), then filesystem,
//! subprocess, and network.

pub mod env_sensitive;
pub mod filesystem;
pub mod network;
pub mod subprocess;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::canonicalize::{lexical_absolute, realpath_best_effort};
use crate::config::PolicyConfig;
use crate::enforce::Enforcer;
use crate::trace::{make_event, EffectData, EventType};
use crate::writer::TraceWriter;

/// Shared state for all patch wrappers. One per recording run.
pub struct PatchContext {
    pub run_id: String,
    pub workspace_root: PathBuf,
    pub writer: Arc<TraceWriter>,
    pub config: Arc<PolicyConfig>,
    enforcer: Option<Enforcer>,
    /// `.agentci` prefixes (as given and realpath), computed once at
    /// construction. Events under these are the recorder's own I/O and
    /// must not appear in the log.
    own_prefixes: Vec<PathBuf>,
}

impl PatchContext {
    pub fn new(
        run_id: String,
        workspace_root: PathBuf,
        writer: Arc<TraceWriter>,
        config: Arc<PolicyConfig>,
        enforcer: Option<Enforcer>,
    ) -> Arc<Self> {
        let agentci = lexical_absolute(&workspace_root.join(".agentci"));
        let agentci_real = realpath_best_effort(&agentci);
        let mut own_prefixes = vec![agentci];
        if !own_prefixes.contains(&agentci_real) {
            own_prefixes.push(agentci_real);
        }
        Arc::new(Self {
            run_id,
            workspace_root,
            writer,
            config,
            enforcer,
            own_prefixes,
        })
    }

    /// Whether the writer is mid-append; wrappers short-circuit then.
    pub fn bypassed(&self) -> bool {
        self.writer.is_bypassed()
    }

    /// Whether a resolved path is the recorder's own `.agentci` I/O.
    pub fn is_own_path(&self, resolved: &Path) -> bool {
        self.own_prefixes.iter().any(|p| resolved.starts_with(p))
    }

    /// Emit one effect event and run the enforcer over it. Infallible by
    /// construction; serialization problems degrade to a dropped event.
    pub fn emit(&self, effect: EffectData) {
        let value = match serde_json::to_value(&effect) {
            Ok(value) => value,
            Err(e) => {
                crate::debug_log!("failed to encode effect: {}", e);
                return;
            }
        };
        let event = make_event(&self.run_id, EventType::Effect, value, None);
        self.writer.write(&event);
        if let Some(enforcer) = &self.enforcer {
            enforcer.check(&effect, &self.writer);
        }
    }
}

/// The facade bundle handed to the host, constructed in install order.
pub struct Patches {
    ctx: Arc<PatchContext>,
    pub env: env_sensitive::RecordedEnv,
    pub fs: filesystem::RecordedFs,
    pub process: subprocess::RecordedProcess,
}

impl Patches {
    /// Build all facades against one context. Order matters: the env
    /// facade comes first because later facades may read env vars.
    pub fn install(ctx: &Arc<PatchContext>) -> Self {
        let env = env_sensitive::RecordedEnv::new(Arc::clone(ctx));
        let fs = filesystem::RecordedFs::new(Arc::clone(ctx));
        let process = subprocess::RecordedProcess::new(Arc::clone(ctx));
        Self {
            ctx: Arc::clone(ctx),
            env,
            fs,
            process,
        }
    }

    /// A recording HTTP client over a default pooled connection. Wrap a
    /// custom-connector client with [`network::RecordedClient::new`].
    pub fn http(&self) -> network::RecordedClient {
        network::RecordedClient::with_default_client(Arc::clone(&self.ctx))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::writer::WriterOptions;

    /// A context writing into a temp workspace, for facade tests.
    pub fn test_context(workspace: &Path) -> Arc<PatchContext> {
        test_context_with_config(workspace, {
            let mut config = PolicyConfig::default();
            config.workspace_root = workspace.to_string_lossy().into_owned();
            config
        })
    }

    pub fn test_context_with_config(
        workspace: &Path,
        config: PolicyConfig,
    ) -> Arc<PatchContext> {
        let run_dir = workspace.join(".agentci/runs/test-run");
        let writer = TraceWriter::create(
            &run_dir.join("trace.jsonl"),
            WriterOptions {
                buffer_size: 1,
                flush_interval_ms: 60_000,
                max_events_per_second: 0,
            },
        )
        .unwrap();
        PatchContext::new(
            "test-run".to_string(),
            workspace.to_path_buf(),
            writer,
            Arc::new(config),
            None,
        )
    }

    /// Read back the effect events recorded so far.
    pub fn recorded_effects(ctx: &PatchContext) -> Vec<EffectData> {
        ctx.writer.flush();
        let events = crate::trace::read_trace(ctx.writer.trace_path()).unwrap_or_default();
        events
            .iter()
            .filter(|e| e.event_type == EventType::Effect)
            .filter_map(|e| EffectData::from_value(&e.data))
            .collect()
    }
}
