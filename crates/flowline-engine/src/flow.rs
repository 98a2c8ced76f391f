// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow graph model.
//!
//! A flow definition is a JSON document with a `nodes` list (one intent
//! router `{type: "intent", map: {label -> path}}`) and a `paths` object of
//! named step lists. Step parsing is tolerant: unknown or malformed steps
//! become [`Step::Unsupported`], a fail-closed terminal the interpreter
//! stops on without raising an error.

use std::collections::HashMap;

use serde_json::Value;

/// The well-known fallback path name used when routing resolves nothing.
pub const PATH_DEFAULT: &str = "path_default";

/// One executable flow step, as a closed tagged variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Append a text envelope.
    SendText { text: String },
    /// Append a template envelope; `template` is the pre-rendered JSON
    /// object `{name, language, components}`.
    SendTemplate { template: String },
    /// Append a media envelope; `media` is the pre-rendered JSON object
    /// `{kind, link}`.
    SendMedia { media: String },
    /// Emit an internal event for webhook fan-out.
    Webhook { event: String, data: Value },
    /// Unconditional pause; resumes at the next index after `seconds`.
    Wait { seconds: u64 },
    /// Suspend until a matching reply arrives or the timeout fires.
    WaitForReply {
        pattern: Option<String>,
        timeout_secs: Option<u64>,
        timeout_path: Option<String>,
    },
    /// Merge one key/value into the contact's attribute map.
    SetAttribute { key: String, value: String },
    /// Anything unrecognized. Terminal.
    Unsupported,
}

impl Step {
    /// Parse a single step object. Never fails; unknown shapes degrade to
    /// [`Step::Unsupported`].
    pub fn from_value(v: &Value) -> Step {
        let Some(obj) = v.as_object() else {
            return Step::Unsupported;
        };
        let step_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
        match step_type {
            "action" => Self::parse_action(obj),
            "wait" | "delay" => Step::Wait {
                seconds: parse_seconds(obj),
            },
            "wait_for_reply" => Step::WaitForReply {
                pattern: obj
                    .get("pattern")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                timeout_secs: obj.get("timeout_secs").and_then(Value::as_u64),
                timeout_path: obj
                    .get("timeout_path")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "set_attribute" => match obj.get("key").and_then(Value::as_str) {
                Some(key) if !key.is_empty() => Step::SetAttribute {
                    key: key.to_string(),
                    value: value_as_string(obj.get("value")),
                },
                _ => Step::Unsupported,
            },
            _ => Step::Unsupported,
        }
    }

    fn parse_action(obj: &serde_json::Map<String, Value>) -> Step {
        match obj.get("action").and_then(Value::as_str).unwrap_or("") {
            "send_text" => Step::SendText {
                text: obj
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .unwrap_or("Gracias por tu mensaje.")
                    .to_string(),
            },
            "send_template" => {
                let name = obj
                    .get("template")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .unwrap_or("welcome");
                let language = obj
                    .get("language")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"code": "es"}));
                let components = obj
                    .get("components")
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                let tpl = serde_json::json!({
                    "name": name,
                    "language": language,
                    "components": components,
                });
                Step::SendTemplate {
                    template: tpl.to_string(),
                }
            }
            "send_media" => {
                let media = obj.get("media").cloned().unwrap_or_else(|| {
                    let link = obj
                        .get("asset")
                        .and_then(Value::as_str)
                        .unwrap_or("https://example.com/demo.jpg");
                    serde_json::json!({"kind": "image", "link": link})
                });
                Step::SendMedia {
                    media: media.to_string(),
                }
            }
            "webhook" => Step::Webhook {
                event: obj
                    .get("event")
                    .and_then(Value::as_str)
                    .filter(|e| !e.is_empty())
                    .unwrap_or("flow.webhook")
                    .to_string(),
                data: obj.get("data").cloned().unwrap_or(Value::Null),
            },
            _ => Step::Unsupported,
        }
    }
}

fn parse_seconds(obj: &serde_json::Map<String, Value>) -> u64 {
    if let Some(s) = obj.get("seconds").and_then(Value::as_u64) {
        return s;
    }
    if let Some(s) = obj.get("sec").and_then(Value::as_u64) {
        return s;
    }
    obj.get("ms").and_then(Value::as_u64).unwrap_or(0) / 1000
}

fn value_as_string(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// A parsed flow graph: the intent router's label map plus named step paths.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    intent_map: Option<HashMap<String, String>>,
    paths: HashMap<String, Vec<Step>>,
}

impl FlowGraph {
    /// Parse a flow definition. Returns `None` when the document is not a
    /// JSON object; missing `nodes`/`paths` yield an empty graph instead.
    pub fn parse(definition: &str) -> Option<FlowGraph> {
        let doc: Value = serde_json::from_str(definition).ok()?;
        let obj = doc.as_object()?;

        let intent_map = obj
            .get("nodes")
            .and_then(Value::as_array)
            .and_then(|nodes| {
                nodes.iter().find_map(|n| {
                    let node = n.as_object()?;
                    if node.get("type").and_then(Value::as_str) != Some("intent") {
                        return None;
                    }
                    let map = node.get("map")?.as_object()?;
                    Some(
                        map.iter()
                            .filter_map(|(label, path)| {
                                Some((label.clone(), path.as_str()?.to_string()))
                            })
                            .collect::<HashMap<_, _>>(),
                    )
                })
            });

        let paths = obj
            .get("paths")
            .and_then(Value::as_object)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|(name, steps)| {
                        let steps = steps.as_array()?;
                        Some((
                            name.clone(),
                            steps.iter().map(Step::from_value).collect::<Vec<_>>(),
                        ))
                    })
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        Some(FlowGraph { intent_map, paths })
    }

    /// Resolve an intent label to a path name.
    ///
    /// Unmapped labels fall back to the router's `default` entry, then to
    /// the well-known [`PATH_DEFAULT`] path.
    pub fn route(&self, label: &str) -> String {
        self.intent_map
            .as_ref()
            .and_then(|map| map.get(label).or_else(|| map.get("default")))
            .cloned()
            .unwrap_or_else(|| PATH_DEFAULT.to_string())
    }

    pub fn path(&self, name: &str) -> Option<&[Step]> {
        self.paths.get(name).map(Vec::as_slice)
    }
}
