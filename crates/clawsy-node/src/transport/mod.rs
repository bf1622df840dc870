//! Text-message transport abstraction.
//!
//! A transport is opened by a [`Connector`] and reports everything that
//! happens to it as [`TransportEvent`]s on the channel it was opened with.
//! Sending is fire-and-forget: failures surface later as `Error` or
//! `Disconnected` events. Reconnection is the engine's job.

pub mod websocket;

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

pub use websocket::WebSocketConnector;

/// Something that happened on an open (or opening) transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Text(String),
    /// Orderly close, with the peer's reason if it gave one.
    Disconnected(Option<String>),
    /// Open failure or read/write error, rendered for [`TransportDiagnosis`].
    Error(String),
}

/// One bidirectional text connection.
pub trait Transport: Send {
    /// Queue a text frame. Never fails synchronously.
    fn send(&self, text: String);

    /// Close the connection. Safe to call repeatedly or before open completes.
    fn close(&mut self);
}

/// Opens transports. The engine takes this as a trait object so tests can
/// script a gateway in memory.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        url: &str,
        timeout: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn Transport>;
}

/// Display classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDiagnosis {
    Refused,
    TimedOut,
    Tls,
    Dns,
    Unknown,
}

impl TransportDiagnosis {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["refused"]) {
            Self::Refused
        } else if has(&["timed out", "timeout"]) {
            Self::TimedOut
        } else if has(&["tls", "ssl", "certificate", "handshake failure"]) {
            Self::Tls
        } else if has(&[
            "dns",
            "failed to lookup",
            "name or service not known",
            "nodename nor servname",
            "no such host",
            "name resolution",
        ]) {
            Self::Dns
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for TransportDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Refused => "connection refused (is the gateway running?)",
            Self::TimedOut => "connection timed out",
            Self::Tls => "TLS error (certificate or protocol mismatch)",
            Self::Dns => "host not found",
            Self::Unknown => "connection failed",
        };
        f.write_str(text)
    }
}
