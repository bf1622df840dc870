//! Node protocol wire types and constants.
//!
//! Frames are JSON text messages. The connect request is the only strongly
//! typed outbound frame; everything else is built by [`crate::codec`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag prefixed to the canonical signing payload.
pub const SIGNATURE_VERSION: &str = "v2";

/// Protocol version advertised as both min and max.
pub const PROTOCOL_VERSION: u32 = 3;

/// Correlation id of the single connect request per transport.
pub const CONNECT_REQUEST_ID: &str = "1";

pub const NODE_ROLE: &str = "node";
pub const NODE_MODE: &str = "node";

/// Gateway keepalives that are dropped before dispatch.
pub const HEARTBEAT_METHODS: &[&str] = &["tick", "health"];

/// Event name of the unsolicited handshake challenge.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Event name of the out-of-band invocation dialect.
pub const INVOKE_REQUEST_EVENT: &str = "node.invoke.request";

/// Method name of the wrapped invocation dialect.
pub const INVOKE_METHOD: &str = "node.invoke";

/// Capability families advertised in the connect request.
pub const NODE_CAPS: &[&str] = &["clipboard", "screen", "camera", "file", "location"];

/// Commands advertised in the connect request.
pub const NODE_COMMANDS: &[&str] = &[
    "clipboard.read",
    "clipboard.write",
    "screen.capture",
    "camera.list",
    "camera.snap",
    "file.list",
    "file.get",
    "file.set",
    "location.get",
    "location.start",
    "location.stop",
    "location.add_smart",
];

/// JSON-RPC style error codes used on command responses.
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const SERVER_ERROR: i64 = -32000;
    pub const TIMED_OUT: i64 = -32001;
    pub const USER_DENIED: i64 = -1;
}

/// A plain request id: an integer or a non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Num(i64),
    Str(String),
}

impl RpcId {
    /// Accept the id forms the gateway uses; anything else cannot be answered.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Num),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Num(n) => Value::from(*n),
            Self::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Structured error answered on a command's correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(codes::TIMED_OUT, message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(codes::USER_DENIED, message)
    }

    /// Best-effort decode of a gateway `error` field.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let code = map.get("code").and_then(Value::as_i64).unwrap_or(codes::SERVER_ERROR);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                Self::new(code, message)
            }
            Value::String(s) => Self::server(s.clone()),
            other => Self::server(other.to_string()),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Terminal result of one dispatched command.
pub type CommandOutcome = Result<Value, RpcError>;

/// Client block of the connect request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

impl ClientInfo {
    /// Client info for the running platform (`openclaw-<platform>`).
    pub fn current(version: &str) -> Self {
        let platform = match std::env::consts::OS {
            "macos" => "macos",
            "linux" => "linux",
            "windows" => "windows",
            _ => "unknown",
        };
        Self {
            id: format!("openclaw-{platform}"),
            version: version.to_string(),
            platform: platform.to_string(),
            mode: NODE_MODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub token: String,
}

/// Signed device block proving possession of the device key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuth {
    pub id: String,
    /// Raw public key, base64url without padding.
    pub public_key: String,
    /// Ed25519 signature of the signing payload, base64url without padding.
    pub signature: String,
    pub signed_at: i64,
    pub nonce: String,
}

/// Params of the `connect` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    pub permissions: BTreeMap<String, bool>,
    pub auth: AuthInfo,
    pub device: DeviceAuth,
}

impl ConnectParams {
    pub fn new(client: ClientInfo, token: &str, device: DeviceAuth) -> Self {
        let permissions = [("clipboard.read", true), ("clipboard.write", true)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            role: NODE_ROLE.to_string(),
            caps: NODE_CAPS.iter().map(|s| s.to_string()).collect(),
            commands: NODE_COMMANDS.iter().map(|s| s.to_string()).collect(),
            permissions,
            auth: AuthInfo {
                token: token.to_string(),
            },
            device,
        }
    }
}
