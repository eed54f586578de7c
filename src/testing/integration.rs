// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Integration tests exercising multiple modules together: full
//! record → summarize → diff → evaluate → verify flows.
