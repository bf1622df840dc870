//! `clawsy send`: deliver one event, connecting just for it if needed.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use clawsy_core::Envelope;

use crate::config::Config;

/// Event kind that asks the agent to act on a message.
pub const AGENT_REQUEST: &str = "agent.request";

/// What to send, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SendArgs {
    pub message: Option<String>,
    pub kind: String,
    pub json: Option<String>,
    pub envelope: bool,
}

/// Build the event payload.
pub fn payload(args: &SendArgs) -> Result<Value> {
    if let Some(raw) = &args.json {
        let value: Value = serde_json::from_str(raw).context("--json is not valid JSON")?;
        return Ok(if args.envelope {
            Envelope::new(args.kind.as_str(), value).to_value()
        } else {
            value
        });
    }

    let Some(text) = args.message.as_deref() else {
        bail!("nothing to send: give a message or --json");
    };

    if args.kind == AGENT_REQUEST {
        let message = if args.envelope {
            Envelope::new("quick_send", json!(text)).to_value().to_string()
        } else {
            text.to_string()
        };
        return Ok(json!({
            "message": message,
            "sessionKey": "main",
            "deliver": true,
            "receipt": true,
        }));
    }

    Ok(if args.envelope {
        Envelope::new(args.kind.as_str(), json!(text)).to_value()
    } else {
        json!({ "message": text })
    })
}

pub async fn run(cfg: &Config, args: &SendArgs) -> Result<()> {
    let payload = payload(args)?;
    let identity = super::load_identity(cfg)?;
    let node = super::spawn_node(cfg, identity);

    let delivered = node.send_one_shot(args.kind.as_str(), payload).await;
    let status = node.status();
    node.shutdown().await;

    if !delivered {
        bail!("event was not delivered ({})", status.state);
    }
    println!("sent {}", args.kind);
    Ok(())
}
