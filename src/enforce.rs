// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Record-time enforcement: the optional synchronous policy check that
//! aborts the run on a violation.
//!
//! After an effect event is written, the enforcer evaluates that single
//! effect under the policy. On any BLOCK finding it prints a diagnostic
//! to stderr, flushes the writer so the violating event is on disk, and
//! terminates the process with exit code 1. This termination is the one
//! deliberate exception to the recorder's fail-open discipline.

use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::policy::evaluate::{evaluate_effect, PolicyFinding, Severity};
use crate::trace::EffectData;
use crate::writer::TraceWriter;

/// Synchronous per-effect policy enforcement.
pub struct Enforcer {
    config: Arc<PolicyConfig>,
}

impl Enforcer {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self { config }
    }

    /// Evaluate one effect; exit the process on a BLOCK finding.
    pub fn check(&self, effect: &EffectData, writer: &TraceWriter) {
        let blocks = self.blocking_findings(effect);
        if blocks.is_empty() {
            return;
        }
        for finding in &blocks {
            eprintln!(
                "[agentci] BLOCK [{}] {}",
                finding.category, finding.message
            );
        }
        eprintln!("[agentci] policy violation in enforce mode, terminating");
        writer.flush();
        std::process::exit(1);
    }

    /// The BLOCK findings for one effect, without terminating. Split out
    /// so the decision is testable.
    pub fn blocking_findings(&self, effect: &EffectData) -> Vec<PolicyFinding> {
        evaluate_effect(effect, &self.config)
            .into_iter()
            .filter(|f| f.severity == Severity::Block)
            .collect()
    }

    /// Whether enforce mode was requested via `AGENTCI_ENFORCE`.
    pub fn enabled_from_env() -> bool {
        matches!(
            std::env::var("AGENTCI_ENFORCE").ok().as_deref().map(str::trim),
            Some("1") | Some("true")
        )
    }
}
