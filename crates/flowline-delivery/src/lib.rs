// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound delivery worker for the Flowline message pipeline.
//!
//! Consumes the outbox stream, calls the messaging provider (or simulates
//! it), retries transient failures with bounded exponential backoff, and
//! persists conversation history idempotently by `client_id`.

pub mod persist;
pub mod provider;
pub mod worker;

pub use persist::DeliveryOutcome;
pub use provider::ProviderClient;
pub use worker::DeliveryWorker;
