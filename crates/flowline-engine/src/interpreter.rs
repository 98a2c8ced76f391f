// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The flow interpreter.
//!
//! Stateless per invocation: an inbound event comes in, zero or more
//! outbound envelopes and internal events go out, and at most one
//! suspension (wait record or scheduled continuation) is written. Business
//! failures degrade to the heuristic fallback reply; only transport publish
//! failures propagate to the consumer loop.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowline_config::model::EngineConfig;
use flowline_core::metrics::EngineMetrics;
use flowline_core::{
    Continuation, FieldMap, FlowlineError, InternalEvent, OutboundContent, OutboundEnvelope,
    streams,
};
use flowline_storage::models::WaitRecord;
use flowline_storage::queries::{contacts, flow_runs, flows, schedule, waits};
use flowline_storage::Database;
use flowline_transport::StreamTransport;

use crate::flow::{FlowGraph, Step};
use crate::intent::{IntentClassifier, fallback_reply, keyword_intent};
use crate::scheduler::ScheduledPayload;

/// An inbound stream entry decoded into the values the interpreter needs.
///
/// Parsing is best-effort throughout: an unrecognizable payload yields empty
/// text and an unknown sender, never an error.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub payload: Value,
    pub text: String,
    pub contact_phone: Option<String>,
    pub org_id: Option<String>,
    pub channel_id: String,
    pub resume: Option<Continuation>,
    pub trace_id: String,
    pub retries: u32,
}

impl InboundEvent {
    pub fn parse(fields: &FieldMap, default_channel: &str) -> Self {
        let payload_raw = fields
            .get("payload")
            .or_else(|| fields.get("body"))
            .cloned()
            .unwrap_or_default();
        let payload: Value = serde_json::from_str(&payload_raw)
            .unwrap_or_else(|_| serde_json::json!({ "text": payload_raw }));

        let (mut text, mut contact_phone) = extract_provider_shape(&payload);
        if text.is_empty() {
            text = payload
                .get("text")
                .or_else(|| payload.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
        }
        // A phone stashed by the scheduler short-circuits re-parsing.
        if let Some(stashed) = fields.get("contact_phone").filter(|p| !p.is_empty()) {
            contact_phone = Some(stashed.clone());
        }
        if contact_phone.is_none() {
            contact_phone = payload
                .pointer("/contact/phone")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let resume = fields
            .get("engine_resume")
            .filter(|r| !r.is_empty())
            .and_then(|r| serde_json::from_str::<Continuation>(r).ok());

        Self {
            payload,
            text,
            contact_phone,
            org_id: fields.get("org_id").filter(|o| !o.is_empty()).cloned(),
            channel_id: fields
                .get("channel_id")
                .filter(|c| !c.is_empty())
                .cloned()
                .unwrap_or_else(|| default_channel.to_string()),
            resume,
            trace_id: fields
                .get("trace_id")
                .filter(|t| !t.is_empty())
                .cloned()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            retries: fields
                .get("retries")
                .and_then(|r| r.parse().ok())
                .unwrap_or(0),
        }
    }

    fn to(&self) -> String {
        self.contact_phone
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// WhatsApp Cloud webhook shape:
/// `entry[0].changes[0].value.messages[0].text.body`, sender from
/// `messages[0].from` or `contacts[0].wa_id`.
fn extract_provider_shape(payload: &Value) -> (String, Option<String>) {
    let Some(value) = payload.pointer("/entry/0/changes/0/value") else {
        return (String::new(), None);
    };
    let text = value
        .pointer("/messages/0/text/body")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let phone = value
        .pointer("/contacts/0/wa_id")
        .or_else(|| value.pointer("/messages/0/from"))
        .and_then(Value::as_str)
        .map(str::to_string);
    (text, phone)
}

/// Does an inbound text satisfy a wait record's pattern?
///
/// Absent pattern matches everything. An invalid regex degrades to a
/// case-insensitive substring check instead of failing the wait.
fn reply_matches(pattern: Option<&str>, text: &str) -> bool {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return true;
    };
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

#[derive(Debug, Default)]
struct FlowOutcome {
    envelopes: Vec<OutboundEnvelope>,
    events: Vec<InternalEvent>,
    suspended: bool,
}

impl FlowOutcome {
    fn produced_output(&self) -> bool {
        !self.envelopes.is_empty() || !self.events.is_empty() || self.suspended
    }
}

pub struct Interpreter {
    db: Database,
    transport: Arc<dyn StreamTransport>,
    classifier: Arc<dyn IntentClassifier>,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
}

impl Interpreter {
    pub fn new(
        db: Database,
        transport: Arc<dyn StreamTransport>,
        classifier: Arc<dyn IntentClassifier>,
        config: EngineConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            db,
            transport,
            classifier,
            config,
            metrics,
        }
    }

    /// Process one inbound stream entry.
    ///
    /// `Err` means a transport publish failed and the caller should apply
    /// its retry/dead-letter policy; every other failure is absorbed here.
    pub async fn handle(&self, fields: &FieldMap) -> Result<(), FlowlineError> {
        let mut event = InboundEvent::parse(fields, &self.config.default_channel);
        let now_ms = Utc::now().timestamp_millis();

        // Wait-record gate. Only fresh inbound traffic is gated; scheduler
        // republications already carry a verified continuation.
        if event.resume.is_none() {
            if let (Some(org), Some(contact)) = (event.org_id.clone(), event.contact_phone.clone())
            {
                match waits::get_wait(&self.db, &org, &event.channel_id, &contact, now_ms).await {
                    Ok(Some(record)) => {
                        if !reply_matches(record.pattern.as_deref(), &event.text) {
                            debug!(
                                org_id = %org,
                                contact = %contact,
                                "suspended conversation, non-matching inbound dropped"
                            );
                            return Ok(());
                        }
                        let cleared = waits::clear_wait_if_token(
                            &self.db,
                            &org,
                            &event.channel_id,
                            &contact,
                            &record.resume_token,
                        )
                        .await
                        .unwrap_or(false);
                        if !cleared {
                            // Timeout fire won the race; this reply is stale.
                            debug!(org_id = %org, contact = %contact, "wait already resolved");
                            return Ok(());
                        }
                        event.resume = Some(Continuation::new(record.path, record.step_index));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "wait-record lookup failed, treating as absent");
                        self.metrics.errors.incr();
                    }
                }
            }
        }

        let outcome = self.run_flow(&event).await;

        let mut replied = false;
        for envelope in &outcome.envelopes {
            self.transport
                .publish(streams::OUTBOX, envelope.to_fields())
                .await?;
            self.metrics.published.incr();
            info!(
                trace_id = %envelope.trace_id,
                to = %envelope.to,
                client_id = %envelope.client_id,
                "published outbox message"
            );
            replied = true;
        }
        for internal in &outcome.events {
            self.transport
                .publish(streams::EVENTS, internal.to_fields())
                .await?;
            debug!(org_id = %internal.org_id, kind = %internal.kind, "published internal event");
        }

        if !replied && !outcome.produced_output() {
            self.publish_fallback(&event).await?;
        }
        Ok(())
    }

    /// Heuristic reply: guarantees the sender hears something whenever flow
    /// execution produced nothing and the conversation is not suspended.
    async fn publish_fallback(&self, event: &InboundEvent) -> Result<(), FlowlineError> {
        let intent = keyword_intent(&event.text);
        let envelope = self.envelope(
            event,
            OutboundContent::Text(fallback_reply(intent).to_string()),
        );
        self.transport
            .publish(streams::OUTBOX, envelope.to_fields())
            .await?;
        self.metrics.published.incr();
        info!(
            trace_id = %envelope.trace_id,
            to = %envelope.to,
            client_id = %envelope.client_id,
            intent,
            "published fallback reply"
        );
        Ok(())
    }

    /// Execute the active flow, absorbing every failure into "no output".
    async fn run_flow(&self, event: &InboundEvent) -> FlowOutcome {
        let mut outcome = FlowOutcome::default();
        let Some(org_id) = event.org_id.clone() else {
            return outcome;
        };

        let flow = match flows::active_flow(&self.db, &org_id).await {
            Ok(flow) => flow,
            Err(e) => {
                warn!(error = %e, org_id = %org_id, "active-flow lookup failed");
                self.metrics.errors.incr();
                None
            }
        };
        let Some(flow) = flow else {
            return outcome;
        };
        let Some(graph) = FlowGraph::parse(&flow.definition) else {
            warn!(flow_id = %flow.id, "flow definition is not a JSON object");
            return outcome;
        };

        let path_key = match &event.resume {
            Some(resume) if !resume.path.is_empty() => resume.path.clone(),
            _ => {
                let label = match self.classifier.classify(&event.text).await {
                    Some(label) => label,
                    None => keyword_intent(&event.text).to_string(),
                };
                graph.route(&label)
            }
        };
        let Some(steps) = graph.path(&path_key) else {
            debug!(flow_id = %flow.id, path = %path_key, "flow has no such path");
            return outcome;
        };

        let start = event.resume.as_ref().map(|r| r.index).unwrap_or(0);
        for (idx, step) in steps
            .iter()
            .enumerate()
            .skip(start)
            .take(self.config.step_budget)
        {
            match step {
                Step::SendText { text } => {
                    outcome
                        .envelopes
                        .push(self.envelope(event, OutboundContent::Text(text.clone())));
                }
                Step::SendTemplate { template } => {
                    outcome
                        .envelopes
                        .push(self.envelope(event, OutboundContent::Template(template.clone())));
                }
                Step::SendMedia { media } => {
                    outcome
                        .envelopes
                        .push(self.envelope(event, OutboundContent::Media(media.clone())));
                }
                Step::Webhook { event: kind, data } => {
                    outcome
                        .events
                        .push(InternalEvent::new(&org_id, kind, data.to_string()));
                }
                Step::SetAttribute { key, value } => {
                    self.apply_attribute(event, &org_id, key, value).await;
                }
                Step::Wait { seconds } => {
                    self.schedule_resume(event, &path_key, idx + 1, *seconds, None)
                        .await;
                    outcome.suspended = true;
                    break;
                }
                Step::WaitForReply {
                    pattern,
                    timeout_secs,
                    timeout_path,
                } => {
                    if self
                        .install_wait(event, &org_id, &path_key, idx, pattern, *timeout_secs,
                            timeout_path)
                        .await
                    {
                        outcome.suspended = true;
                    }
                    break;
                }
                Step::Unsupported => break,
            }
        }

        let status = if outcome.envelopes.is_empty() {
            "running"
        } else {
            "completed"
        };
        let context = serde_json::json!({
            "intent": keyword_intent(&event.text),
            "last_step": path_key,
        });
        if let Err(e) = flow_runs::insert_run(
            &self.db,
            &org_id,
            Some(&flow.id),
            None,
            None,
            status,
            &context,
        )
        .await
        {
            warn!(error = %e, "flow_run persist failed");
            self.metrics.errors.incr();
        }

        outcome
    }

    fn envelope(&self, event: &InboundEvent, content: OutboundContent) -> OutboundEnvelope {
        OutboundEnvelope {
            channel_id: event.channel_id.clone(),
            to: event.to(),
            content,
            client_id: format!("auto_{}", Uuid::new_v4().simple()),
            trace_id: event.trace_id.clone(),
            org_id: event.org_id.clone(),
            requested_by: Some("flow-engine".to_string()),
            conversation_id: None,
            orig_text: Some(event.text.clone()),
        }
    }

    /// Merge one attribute into the contact record. Best-effort.
    async fn apply_attribute(&self, event: &InboundEvent, org_id: &str, key: &str, value: &str) {
        let Some(phone) = &event.contact_phone else {
            debug!("set_attribute skipped, sender unknown");
            return;
        };
        let result = async {
            let contact =
                contacts::resolve_or_create(&self.db, org_id, &event.channel_id, phone).await?;
            contacts::merge_attributes(
                &self.db,
                &contact.id,
                &[(key.to_string(), value.to_string())],
            )
            .await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, key, "set_attribute failed");
            self.metrics.errors.incr();
        }
    }

    /// Write a scheduled continuation firing after `delay_secs`. Best-effort.
    async fn schedule_resume(
        &self,
        event: &InboundEvent,
        path: &str,
        next_index: usize,
        delay_secs: u64,
        resume_token: Option<&str>,
    ) {
        let continuation = Continuation::new(path, next_index);
        let item = ScheduledPayload {
            payload: event.payload.to_string(),
            org_id: event.org_id.clone().unwrap_or_default(),
            channel_id: event.channel_id.clone(),
            contact_phone: event.contact_phone.clone().unwrap_or_default(),
            engine_resume: serde_json::to_string(&continuation).unwrap_or_default(),
            resume_token: resume_token.map(str::to_string),
        };
        let due_at = Utc::now().timestamp_millis() + (delay_secs as i64) * 1000;
        let serialized = match serde_json::to_string(&item) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "scheduled item serialization failed");
                self.metrics.errors.incr();
                return;
            }
        };
        match schedule::add_scheduled(&self.db, due_at, &serialized, resume_token).await {
            Ok(_) => {
                self.metrics.scheduled.incr();
                info!(
                    delay_secs,
                    path, index = next_index, "scheduled flow resume"
                );
            }
            Err(e) => {
                warn!(error = %e, "schedule failed");
                self.metrics.errors.incr();
            }
        }
    }

    /// Install a wait record (and its optional timeout timer).
    ///
    /// Returns whether the suspension actually took hold; when it could not
    /// be written the step chain just stops and the fallback policy applies.
    #[allow(clippy::too_many_arguments)]
    async fn install_wait(
        &self,
        event: &InboundEvent,
        org_id: &str,
        path: &str,
        idx: usize,
        pattern: &Option<String>,
        timeout_secs: Option<u64>,
        timeout_path: &Option<String>,
    ) -> bool {
        let Some(contact) = event.contact_phone.clone() else {
            debug!("wait_for_reply skipped, sender unknown");
            return false;
        };
        let token = Uuid::new_v4().to_string();
        let ttl_secs = timeout_secs.unwrap_or(self.config.wait_default_ttl_secs);
        let record = WaitRecord {
            org_id: org_id.to_string(),
            channel_id: event.channel_id.clone(),
            contact,
            path: path.to_string(),
            step_index: idx + 1,
            pattern: pattern.clone(),
            resume_token: token.clone(),
            timeout_path: timeout_path.clone(),
            expires_at: Utc::now().timestamp_millis() + (ttl_secs as i64) * 1000,
        };
        if let Err(e) = waits::put_wait(&self.db, &record).await {
            warn!(error = %e, "wait record write failed");
            self.metrics.errors.incr();
            return false;
        }
        if let Some(timeout) = timeout_secs {
            // A named timeout path restarts at its top; otherwise the flow
            // continues past the wait as if the reply had arrived.
            let (t_path, t_index) = match timeout_path {
                Some(p) if !p.is_empty() => (p.as_str(), 0),
                _ => (path, idx + 1),
            };
            self.schedule_resume(event, t_path, t_index, timeout, Some(&token))
                .await;
        }
        info!(path, index = idx + 1, "conversation suspended awaiting reply");
        true
    }
}
