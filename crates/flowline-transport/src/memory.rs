// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process stream transport with consumer-group semantics.
//!
//! All synchronization is internal; the transport handle is cheap to clone
//! via `Arc` and safe for concurrent use from every worker loop. Groups
//! start at the beginning of the retained log, so entries published before
//! a worker attaches are still processed.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::trace;

use flowline_core::{FieldMap, FlowlineError};

use crate::{StreamMessage, StreamTransport};

/// Upper bound on a single wait slice while blocking for new entries.
/// Keeps the consume loop responsive to publishes racing the wait setup.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next log entry to deliver to this group.
    cursor: usize,
    /// Delivered-but-unacknowledged entry ids.
    pending: HashSet<String>,
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    entries: Vec<StreamMessage>,
    groups: HashMap<String, GroupState>,
}

/// In-process [`StreamTransport`] implementation.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    streams: Mutex<HashMap<String, StreamState>>,
    published: Notify,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries ever appended to a stream.
    pub async fn len(&self, stream: &str) -> usize {
        let streams = self.streams.lock().await;
        streams.get(stream).map(|s| s.entries.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self, stream: &str) -> bool {
        self.len(stream).await == 0
    }

    /// Snapshot of a stream's full log, oldest first. Used by tests and
    /// dead-letter inspection tooling.
    pub async fn read_all(&self, stream: &str) -> Vec<StreamMessage> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    /// Count of unacknowledged entries a group currently holds.
    pub async fn pending(&self, stream: &str, group: &str) -> usize {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn publish(&self, stream: &str, fields: FieldMap) -> Result<String, FlowlineError> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        let id = format!("{}-0", state.next_seq);
        state.next_seq += 1;
        state.entries.push(StreamMessage {
            id: id.clone(),
            fields,
        });
        drop(streams);
        self.published.notify_waiters();
        trace!(stream, id = id.as_str(), "published stream entry");
        Ok(id)
    }

    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, FlowlineError> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut streams = self.streams.lock().await;
                let state = streams.entry(stream.to_string()).or_default();
                let group_state = state.groups.entry(group.to_string()).or_default();

                if group_state.cursor < state.entries.len() {
                    let end = (group_state.cursor + count.max(1)).min(state.entries.len());
                    let batch: Vec<StreamMessage> =
                        state.entries[group_state.cursor..end].to_vec();
                    group_state.cursor = end;
                    for msg in &batch {
                        group_state.pending.insert(msg.id.clone());
                    }
                    trace!(
                        stream,
                        group,
                        consumer,
                        delivered = batch.len(),
                        "delivered batch to consumer group"
                    );
                    return Ok(batch);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            let _ = tokio::time::timeout(slice, self.published.notified()).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), FlowlineError> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(id);
            }
        }
        Ok(())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), FlowlineError> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn publish_and_consume_fifo() {
        let t = MemoryTransport::new();
        t.ensure_group("s", "g").await.unwrap();
        t.publish("s", fields(&[("n", "1")])).await.unwrap();
        t.publish("s", fields(&[("n", "2")])).await.unwrap();
        t.publish("s", fields(&[("n", "3")])).await.unwrap();

        let batch = t
            .consume_group("s", "g", "c1", Duration::ZERO, 10)
            .await
            .unwrap();
        let ns: Vec<&str> = batch.iter().map(|m| m.fields["n"].as_str()).collect();
        assert_eq!(ns, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn entries_delivered_once_per_group_until_ack() {
        let t = MemoryTransport::new();
        t.ensure_group("s", "g").await.unwrap();
        t.publish("s", fields(&[("n", "1")])).await.unwrap();

        let batch = t
            .consume_group("s", "g", "c1", Duration::ZERO, 1)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(t.pending("s", "g").await, 1);

        // Second read yields nothing: the entry is pending, not redelivered.
        let again = t
            .consume_group("s", "g", "c1", Duration::ZERO, 1)
            .await
            .unwrap();
        assert!(again.is_empty());

        t.ack("s", "g", &batch[0].id).await.unwrap();
        assert_eq!(t.pending("s", "g").await, 0);
    }

    #[tokio::test]
    async fn independent_groups_each_see_all_entries() {
        let t = MemoryTransport::new();
        t.publish("s", fields(&[("n", "1")])).await.unwrap();
        t.ensure_group("s", "a").await.unwrap();
        t.ensure_group("s", "b").await.unwrap();

        let a = t
            .consume_group("s", "a", "c", Duration::ZERO, 10)
            .await
            .unwrap();
        let b = t
            .consume_group("s", "b", "c", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].id, b[0].id);
    }

    #[tokio::test]
    async fn competing_consumers_get_disjoint_entries() {
        let t = Arc::new(MemoryTransport::new());
        t.ensure_group("s", "g").await.unwrap();
        for i in 0..10 {
            t.publish("s", fields(&[("n", &i.to_string())])).await.unwrap();
        }

        let t1 = t.clone();
        let t2 = t.clone();
        let h1 = tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let batch = t1
                    .consume_group("s", "g", "c1", Duration::ZERO, 2)
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                seen.extend(batch.into_iter().map(|m| m.id));
            }
            seen
        });
        let h2 = tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let batch = t2
                    .consume_group("s", "g", "c2", Duration::ZERO, 2)
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                seen.extend(batch.into_iter().map(|m| m.id));
            }
            seen
        });

        let mut all: Vec<String> = h1.await.unwrap();
        all.extend(h2.await.unwrap());
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 10, "no entry may be delivered twice");
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_publish() {
        let t = Arc::new(MemoryTransport::new());
        t.ensure_group("s", "g").await.unwrap();

        let reader = t.clone();
        let handle = tokio::spawn(async move {
            reader
                .consume_group("s", "g", "c", Duration::from_secs(5), 1)
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        t.publish("s", fields(&[("n", "1")])).await.unwrap();

        let batch = handle.await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn blocking_read_times_out_empty() {
        let t = MemoryTransport::new();
        let batch = t
            .consume_group("s", "g", "c", Duration::from_millis(30), 1)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let t = MemoryTransport::new();
        t.ensure_group("s", "g").await.unwrap();
        t.publish("s", fields(&[("n", "1")])).await.unwrap();
        // Re-ensuring must not reset the cursor or pending state.
        let batch = t
            .consume_group("s", "g", "c", Duration::ZERO, 1)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        t.ensure_group("s", "g").await.unwrap();
        let again = t
            .consume_group("s", "g", "c", Duration::ZERO, 1)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn ack_unknown_id_is_ignored() {
        let t = MemoryTransport::new();
        t.ack("s", "g", "99-0").await.unwrap();
    }
}
