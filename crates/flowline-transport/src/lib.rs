// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stream transport for the Flowline message pipeline.
//!
//! A durable, ordered append log with named consumer groups: each group
//! receives every entry exactly once until acknowledged, FIFO within a
//! stream. Requeue-on-failure is a consumer concern (re-publish with an
//! incremented `retries` field); the transport never redelivers on its own.
//!
//! [`StreamTransport`] is the seam for a real log backend (Redis Streams,
//! Kafka, ...); [`MemoryTransport`] implements the contract in-process and
//! is what the bundled workers share.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use flowline_core::{FieldMap, FlowlineError};

/// A single entry as delivered to a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Monotonic per-stream entry id.
    pub id: String,
    pub fields: FieldMap,
}

/// The operations the pipeline workers require from a log backend.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Append an entry to a stream, creating the stream if missing.
    /// Returns the assigned entry id.
    async fn publish(&self, stream: &str, fields: FieldMap) -> Result<String, FlowlineError>;

    /// Read up to `count` undelivered entries for `group`, blocking up to
    /// `block` when none are available. Entries stay pending for the group
    /// until acknowledged; an empty vec means the block window elapsed.
    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, FlowlineError>;

    /// Acknowledge an entry for a group. Unknown ids are ignored.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), FlowlineError>;

    /// Create a consumer group on a stream. Idempotent: an existing group
    /// is left untouched.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), FlowlineError>;
}

pub use memory::MemoryTransport;
