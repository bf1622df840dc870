//! Outbound event envelope.
//!
//! Content pushed from the node to the agent is wrapped as
//! `{"clawsy_envelope": {version, type, localTime, tz, content, ...}}` so the
//! agent can tell where and when it was produced.

use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use serde_json::{json, Map, Value};

/// Envelope format version, tracks the crate version.
pub const ENVELOPE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key the envelope is nested under.
pub const ENVELOPE_KEY: &str = "clawsy_envelope";

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: String,
    local_time: String,
    tz: String,
    content: Value,
    metadata: Map<String, Value>,
    telemetry: Option<Value>,
}

impl Envelope {
    /// Build an envelope stamped with the current local time.
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        let now = Local::now().fixed_offset();
        Self::at(kind, content, now, local_tz(&now))
    }

    /// Build an envelope with an explicit timestamp and zone label.
    pub fn at(
        kind: impl Into<String>,
        content: Value,
        time: DateTime<FixedOffset>,
        tz: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            local_time: time.to_rfc3339_opts(SecondsFormat::Millis, false),
            tz: tz.into(),
            content,
            metadata: Map::new(),
            telemetry: None,
        }
    }

    /// Add an extra top-level key. Reserved keys are not overwritten.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.metadata.insert(key, value);
        }
        self
    }

    pub fn with_telemetry(mut self, telemetry: Value) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut inner = Map::new();
        inner.insert("version".into(), json!(ENVELOPE_VERSION));
        inner.insert("type".into(), json!(self.kind));
        inner.insert("localTime".into(), json!(self.local_time));
        inner.insert("tz".into(), json!(self.tz));
        inner.insert("content".into(), self.content.clone());
        for (key, value) in &self.metadata {
            inner.insert(key.clone(), value.clone());
        }
        if let Some(telemetry) = &self.telemetry {
            inner.insert("telemetry".into(), telemetry.clone());
        }

        let mut outer = Map::new();
        outer.insert(ENVELOPE_KEY.into(), Value::Object(inner));
        Value::Object(outer)
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        "version" | "type" | "localTime" | "tz" | "content" | "telemetry"
    )
}

/// `$TZ` when set, otherwise the UTC offset of `now`.
fn local_tz(now: &DateTime<FixedOffset>) -> String {
    match std::env::var("TZ") {
        Ok(tz) if !tz.trim().is_empty() => tz,
        _ => now.offset().to_string(),
    }
}
