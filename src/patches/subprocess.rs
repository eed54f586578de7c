// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Subprocess facade: spawn / status / output wrappers over
//! `std::process::Command` and `tokio::process::Command`.
//!
//! The exec effect carries the raw command string and the normalized argv
//! (basename plus arguments, temp paths collapsed). Spawning counts as
//! success the moment the child starts; for `status` / `output` the
//! effect is emitted once the call returns, regardless of the child's
//! exit code — a process that ran and failed still ran.

use std::sync::Arc;

use crate::canonicalize::normalize_command;
use crate::patches::PatchContext;
use crate::trace::{EffectData, ExecEffect};

/// Recorded subprocess operations.
pub struct RecordedProcess {
    ctx: Arc<PatchContext>,
}

fn command_parts(command: &std::process::Command) -> (String, Vec<String>) {
    let program = command.get_program().to_string_lossy().into_owned();
    let args = command
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    (program, args)
}

impl RecordedProcess {
    pub fn new(ctx: Arc<PatchContext>) -> Self {
        Self { ctx }
    }

    fn record(&self, program: &str, args: &[String]) {
        if self.ctx.bypassed() {
            return;
        }
        let (_, argv_normalized) = normalize_command(program, args);
        self.ctx.emit(EffectData::exec(ExecEffect {
            command_raw: program.to_string(),
            argv_normalized,
        }));
    }

    // ── Sync ────────────────────────────────────────────────────────────

    pub fn spawn(
        &self,
        command: &mut std::process::Command,
    ) -> std::io::Result<std::process::Child> {
        let (program, args) = command_parts(command);
        let result = command.spawn();
        if result.is_ok() {
            self.record(&program, &args);
        }
        result
    }

    pub fn status(
        &self,
        command: &mut std::process::Command,
    ) -> std::io::Result<std::process::ExitStatus> {
        let (program, args) = command_parts(command);
        let result = command.status();
        if result.is_ok() {
            self.record(&program, &args);
        }
        result
    }

    pub fn output(
        &self,
        command: &mut std::process::Command,
    ) -> std::io::Result<std::process::Output> {
        let (program, args) = command_parts(command);
        let result = command.output();
        if result.is_ok() {
            self.record(&program, &args);
        }
        result
    }

    // ── Async (emit on resolve only) ────────────────────────────────────

    pub fn spawn_async(
        &self,
        command: &mut tokio::process::Command,
    ) -> std::io::Result<tokio::process::Child> {
        let (program, args) = command_parts(command.as_std());
        let result = command.spawn();
        if result.is_ok() {
            self.record(&program, &args);
        }
        result
    }

    pub async fn status_async(
        &self,
        command: &mut tokio::process::Command,
    ) -> std::io::Result<std::process::ExitStatus> {
        let (program, args) = command_parts(command.as_std());
        let result = command.status().await;
        if result.is_ok() {
            self.record(&program, &args);
        }
        result
    }

    pub async fn output_async(
        &self,
        command: &mut tokio::process::Command,
    ) -> std::io::Result<std::process::Output> {
        let (program, args) = command_parts(command.as_std());
        let result = command.output().await;
        if result.is_ok() {
            self.record(&program, &args);
        }
        result
    }
}
