// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow interpreter and continuation scheduler.
//!
//! Consumes inbound provider events, executes the tenant's active flow
//! graph step by step, and suspends durably across `wait` and
//! `wait_for_reply` steps via scheduled continuations and wait records.

pub mod flow;
pub mod intent;
pub mod interpreter;
pub mod scheduler;
pub mod worker;

pub use flow::{FlowGraph, Step};
pub use intent::{IntentClassifier, NoClassifier, RemoteClassifier};
pub use interpreter::Interpreter;
pub use scheduler::Scheduler;
pub use worker::EngineWorker;
