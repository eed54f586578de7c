// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Policy evaluation over effect signatures.

pub mod evaluate;
pub mod globs;
