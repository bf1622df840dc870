//! Inbound frame parsing and outbound frame encoding.
//!
//! The gateway speaks three request dialects. They are normalized here into
//! one [`CommandRequest`] shape, and the dialect survives only as the tag on
//! [`CorrelationId`]. [`encode_response`] is the single function that turns
//! the tag back into the matching response envelope.

use std::fmt;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{NodeError, NodeResult};
use crate::messages::{
    CommandOutcome, ConnectParams, RpcError, RpcId, CHALLENGE_EVENT, CONNECT_REQUEST_ID,
    HEARTBEAT_METHODS, INVOKE_METHOD, INVOKE_REQUEST_EVENT,
};

/// Correlation id of a command, tagged with the dialect it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationId {
    /// `{type:"req", id, method, params}` or a bare `{id, method}` frame.
    Plain(RpcId),
    /// `{event:"node.invoke.request", payload:{id, command, paramsJSON}}`.
    Invocation(String),
    /// `{id, method:"node.invoke", params:{command, params}}`.
    Wrapped(RpcId),
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(id) => write!(f, "{id}"),
            Self::Invocation(id) => write!(f, "inv:{id}"),
            Self::Wrapped(id) => write!(f, "wrap:{id}"),
        }
    }
}

/// A command request normalized from any dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub id: CorrelationId,
    pub command: String,
    pub params: Value,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Handshake challenge carrying the nonce to sign.
    Challenge { nonce: String },
    /// Gateway answer to our connect request.
    ConnectResponse(Result<Value, RpcError>),
    /// Any other response frame (acks of our own events).
    Response { id: Option<RpcId> },
    /// A command to dispatch.
    Command(CommandRequest),
    /// `tick` / `health` keepalives.
    Heartbeat,
    /// Frames the node has no use for (broadcast events, id-less requests).
    Ignored,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

fn object_or_empty(value: Option<&Value>) -> Value {
    value
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(empty_params)
}

/// Parse one text frame.
pub fn parse_frame(text: &str) -> NodeResult<Inbound> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| NodeError::InvalidFrame(e.to_string()))?;
    let Value::Object(frame) = value else {
        return Err(NodeError::InvalidFrame("frame is not a JSON object".into()));
    };

    let field = |key: &str| frame.get(key).and_then(Value::as_str);
    let method = field("method");
    let event = field("event");
    let name = method.or(event).or_else(|| field("command"));

    if name.is_some_and(|n| HEARTBEAT_METHODS.contains(&n)) {
        return Ok(Inbound::Heartbeat);
    }

    if event == Some(CHALLENGE_EVENT) {
        let nonce = frame
            .get("payload")
            .and_then(|p| p.get("nonce"))
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::InvalidFrame("challenge without nonce".into()))?;
        return Ok(Inbound::Challenge {
            nonce: nonce.to_string(),
        });
    }

    if event == Some(INVOKE_REQUEST_EVENT) {
        return Ok(parse_invoke_event(frame.get("payload")));
    }

    if matches!(field("type"), Some("res" | "response" | "error")) {
        return Ok(parse_response(&frame));
    }

    let Some(name) = name else {
        return Ok(Inbound::Ignored);
    };
    let Some(id) = frame.get("id").and_then(RpcId::from_value) else {
        return Ok(Inbound::Ignored);
    };

    let params = match frame.get("params").filter(|p| p.is_object()) {
        Some(p) => p.clone(),
        None => object_or_empty(frame.get("payload")),
    };

    if name == INVOKE_METHOD {
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        let inner = match params.get("params").filter(|p| p.is_object()) {
            Some(p) => p.clone(),
            None => params.clone(),
        };
        return Ok(Inbound::Command(CommandRequest {
            id: CorrelationId::Wrapped(id),
            command,
            params: inner,
        }));
    }

    Ok(Inbound::Command(CommandRequest {
        id: CorrelationId::Plain(id),
        command: name.to_string(),
        params,
    }))
}

fn parse_invoke_event(payload: Option<&Value>) -> Inbound {
    let Some(payload) = payload else {
        return Inbound::Ignored;
    };
    let Some(invocation_id) = payload.get("id").and_then(Value::as_str) else {
        return Inbound::Ignored;
    };

    let command = payload
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // paramsJSON is a string holding a JSON object; anything else means no params.
    let params = payload
        .get("paramsJSON")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter(|v| v.is_object())
        .unwrap_or_else(empty_params);

    Inbound::Command(CommandRequest {
        id: CorrelationId::Invocation(invocation_id.to_string()),
        command,
        params,
    })
}

fn parse_response(frame: &Map<String, Value>) -> Inbound {
    let id = frame.get("id").and_then(RpcId::from_value);
    if id != Some(RpcId::Str(CONNECT_REQUEST_ID.to_string())) {
        return Inbound::Response { id };
    }

    let hello_ok = frame
        .get("payload")
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        == Some("hello-ok");

    match frame.get("result").filter(|r| !r.is_null()) {
        Some(result) => Inbound::ConnectResponse(Ok(result.clone())),
        None if hello_ok => Inbound::ConnectResponse(Ok(frame
            .get("payload")
            .cloned()
            .unwrap_or(Value::Null))),
        None => match frame.get("error").filter(|e| !e.is_null()) {
            Some(err) => Inbound::ConnectResponse(Err(RpcError::from_value(err))),
            None => Inbound::Response { id },
        },
    }
}

/// Encode the terminal response for a command in the dialect it arrived in.
pub fn encode_response(id: &CorrelationId, outcome: &CommandOutcome, node_id: &str) -> Value {
    match (id, outcome) {
        (CorrelationId::Plain(id), Ok(result)) => json!({
            "type": "res",
            "id": id.to_value(),
            "result": result,
        }),
        (CorrelationId::Plain(id), Err(err)) => json!({
            "type": "res",
            "id": id.to_value(),
            "error": { "code": err.code, "message": err.message },
        }),
        (CorrelationId::Invocation(id), Ok(payload)) => json!({
            "type": "req",
            "method": "node.invoke.result",
            "params": { "id": id, "nodeId": node_id, "ok": true, "payload": payload },
        }),
        // The invocation dialect carries error codes as strings.
        (CorrelationId::Invocation(id), Err(err)) => json!({
            "type": "req",
            "method": "node.invoke.result",
            "params": {
                "id": id,
                "nodeId": node_id,
                "ok": false,
                "error": { "code": err.code.to_string(), "message": err.message },
            },
        }),
        (CorrelationId::Wrapped(id), Ok(payload)) => json!({
            "type": "res",
            "id": id.to_value(),
            "result": { "ok": true, "payload": payload },
        }),
        (CorrelationId::Wrapped(id), Err(err)) => json!({
            "type": "res",
            "id": id.to_value(),
            "result": { "ok": false, "error": { "code": err.code, "message": err.message } },
        }),
    }
}

/// Interim "processing" ack. Only the plain dialect has one.
pub fn encode_ack(id: &CorrelationId) -> Option<Value> {
    match id {
        CorrelationId::Plain(id) => Some(json!({
            "type": "ack",
            "id": id.to_value(),
            "status": "processing",
        })),
        CorrelationId::Invocation(_) | CorrelationId::Wrapped(_) => None,
    }
}

/// Fire-and-forget node event, sent as a `node.event` request.
pub fn encode_event(kind: &str, payload: Value) -> Value {
    let suffix = Uuid::new_v4().simple().to_string();
    json!({
        "type": "req",
        "id": format!("event-{}", &suffix[..8]),
        "method": "node.event",
        "params": { "event": kind, "payload": payload },
    })
}

/// The connect request sent in answer to the challenge.
pub fn encode_connect(params: &ConnectParams) -> NodeResult<Value> {
    Ok(json!({
        "type": "req",
        "id": CONNECT_REQUEST_ID,
        "method": "connect",
        "params": serde_json::to_value(params)?,
    }))
}
