// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Flowline message pipeline.
//!
//! Provides the shared error type, the domain types carried on the streams
//! (envelopes, continuations, internal events), and the injected metric
//! counters used by every worker.

pub mod error;
pub mod metrics;
pub mod types;

pub use error::FlowlineError;
pub use types::{
    Continuation, FieldMap, InternalEvent, OutboundContent, OutboundEnvelope, streams,
};
