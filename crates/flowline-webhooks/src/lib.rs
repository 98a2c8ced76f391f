// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound webhook delivery for the Flowline message pipeline.
//!
//! Internal events published to the events stream are fanned out to every
//! endpoint the owning org has registered, signed with the endpoint's
//! shared secret when one is configured.

pub mod dispatcher;
pub mod signer;

pub use dispatcher::WebhookDispatcher;
