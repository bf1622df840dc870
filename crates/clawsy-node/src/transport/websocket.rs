//! WebSocket transport over tokio-tungstenite.
//!
//! Each open spawns one socket task that owns the stream. Outbound frames
//! reach it through an unbounded channel, inbound frames and lifecycle
//! changes leave it as [`TransportEvent`]s.

use std::sync::Once;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{Connector, Transport, TransportEvent};

static CRYPTO_PROVIDER: Once = Once::new();

fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Fails only if another provider was installed first, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(
        &self,
        url: &str,
        timeout: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn Transport> {
        install_crypto_provider();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(socket_task(url.to_string(), timeout, events, outgoing_rx));
        Box::new(WebSocketTransport {
            outgoing: Some(outgoing_tx),
        })
    }
}

/// Handle to a socket task.
pub struct WebSocketTransport {
    outgoing: Option<mpsc::UnboundedSender<Message>>,
}

impl Transport for WebSocketTransport {
    fn send(&self, text: String) {
        if let Some(tx) = &self.outgoing {
            // A closed channel means the socket task ended; it already reported why.
            let _ = tx.send(Message::Text(text));
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.outgoing.take() {
            let _ = tx.send(Message::Close(None));
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn socket_task(
    url: String,
    timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    let stream = match time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            tracing::debug!(url = %url, error = %e, "websocket open failed");
            let _ = events.send(TransportEvent::Error(e.to_string()));
            return;
        }
        Err(_) => {
            let _ = events.send(TransportEvent::Error(format!(
                "connection timed out after {}s",
                timeout.as_secs()
            )));
            return;
        }
    };

    tracing::debug!(url = %url, "websocket open");
    if events.send(TransportEvent::Connected).is_err() {
        return;
    }

    let (mut sink, mut read) = stream.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => {
                let Some(msg) = out else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    let _ = events.send(TransportEvent::Error(format!("websocket send failed: {e}")));
                    break;
                }
                if closing {
                    let _ = events.send(TransportEvent::Disconnected(None));
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Text(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Text(text));
                    }
                    Err(_) => tracing::debug!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    tracing::debug!(reason = ?reason, "websocket close frame received");
                    let _ = events.send(TransportEvent::Disconnected(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Disconnected(None));
                    break;
                }
            }
        }
    }

    tracing::debug!(url = %url, "websocket task ended");
}
