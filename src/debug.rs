// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Stderr debug logging, enabled with `AGENTCI_DEBUG=1`.
//!
//! The recording path must never write to stdout (it belongs to the host
//! program) and must stay silent unless the operator opts in. Offline tools
//! print their own operational messages directly.

use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

/// Whether `AGENTCI_DEBUG` was set to `1` or `true` at first check.
pub fn debug_enabled() -> bool {
    *DEBUG_ENABLED.get_or_init(|| {
        matches!(
            std::env::var("AGENTCI_DEBUG").ok().as_deref().map(str::trim),
            Some("1") | Some("true")
        )
    })
}

/// Print a debug line to stderr when `AGENTCI_DEBUG` is enabled.
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        if $crate::debug::debug_enabled() {
            eprintln!("[agentci debug] {}", format!($($arg)*));
        }
    };
}
