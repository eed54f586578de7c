// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Signature diffing: per-field set difference against a baseline.
//!
//! Drift is `current \ baseline`, preserving the sorted order of the
//! current signature. With no baseline, everything current is drift.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::signature::{EffectSignature, SignatureEffects};

/// Per-field drift of a current signature against a baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiffResult {
    pub drift: SignatureEffects,
}

impl DiffResult {
    /// True when no field drifted.
    pub fn is_empty(&self) -> bool {
        let d = &self.drift;
        d.fs_writes.is_empty()
            && d.fs_reads_external.is_empty()
            && d.fs_deletes.is_empty()
            && d.net_protocols.is_empty()
            && d.net_etld_plus_1.is_empty()
            && d.net_hosts.is_empty()
            && d.net_ports.is_empty()
            && d.exec_commands.is_empty()
            && d.exec_argv.is_empty()
            && d.sensitive_keys_accessed.is_empty()
    }
}

fn string_drift(current: &[String], baseline: &[String]) -> Vec<String> {
    let known: HashSet<&str> = baseline.iter().map(String::as_str).collect();
    current
        .iter()
        .filter(|v| !known.contains(v.as_str()))
        .cloned()
        .collect()
}

fn port_drift(current: &[u16], baseline: &[u16]) -> Vec<u16> {
    let known: HashSet<u16> = baseline.iter().copied().collect();
    current
        .iter()
        .copied()
        .filter(|p| !known.contains(p))
        .collect()
}

/// Diff a current signature against an optional baseline.
pub fn diff(current: &EffectSignature, baseline: Option<&EffectSignature>) -> DiffResult {
    let Some(baseline) = baseline else {
        return DiffResult {
            drift: current.effects.clone(),
        };
    };
    let c = &current.effects;
    let b = &baseline.effects;
    DiffResult {
        drift: SignatureEffects {
            fs_writes: string_drift(&c.fs_writes, &b.fs_writes),
            fs_reads_external: string_drift(&c.fs_reads_external, &b.fs_reads_external),
            fs_deletes: string_drift(&c.fs_deletes, &b.fs_deletes),
            net_protocols: string_drift(&c.net_protocols, &b.net_protocols),
            net_etld_plus_1: string_drift(&c.net_etld_plus_1, &b.net_etld_plus_1),
            net_hosts: string_drift(&c.net_hosts, &b.net_hosts),
            net_ports: port_drift(&c.net_ports, &b.net_ports),
            exec_commands: string_drift(&c.exec_commands, &b.exec_commands),
            exec_argv: string_drift(&c.exec_argv, &b.exec_argv),
            sensitive_keys_accessed: string_drift(
                &c.sensitive_keys_accessed,
                &b.sensitive_keys_accessed,
            ),
        },
    }
}
