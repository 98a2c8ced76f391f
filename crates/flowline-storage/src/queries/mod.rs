// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table family.

pub mod contacts;
pub mod conversations;
pub mod endpoints;
pub mod flow_runs;
pub mod flows;
pub mod messages;
pub mod schedule;
pub mod waits;
