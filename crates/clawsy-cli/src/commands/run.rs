//! `clawsy run`: connect to the gateway and serve commands until Ctrl-C.

use anyhow::{Context, Result};
use tracing::info;

use clawsy_core::short_id;
use clawsy_node::{ConnectionState, NodeStatus, TunnelFailure};

use crate::config::Config;

pub async fn run(cfg: &Config) -> Result<()> {
    let identity = super::load_identity(cfg)?;
    let device_id = identity.device_id().to_string();
    let node = super::spawn_node(cfg, identity);

    eprintln!(
        "clawsy node {} -> {}:{}",
        short_id(&device_id),
        cfg.gateway.host,
        cfg.gateway.port
    );
    node.connect().await.context("cannot start connection")?;

    let mut status = node.subscribe();
    let mut was_paired = false;
    let outcome = loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                eprintln!("{}", describe(&current));

                match &current.state {
                    ConnectionState::Paired => was_paired = true,
                    ConnectionState::Disconnected if was_paired => {
                        break Err(anyhow::anyhow!("gateway closed the connection"));
                    }
                    ConnectionState::Failed(_) | ConnectionState::TunnelFailed(_) => {
                        break Err(anyhow::anyhow!("{}", current.state));
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, disconnecting");
                break Ok(());
            }
        }
    };

    node.shutdown().await;
    outcome
}

/// One status line per transition.
fn describe(status: &NodeStatus) -> String {
    let via = if status.tunneled { " (via ssh tunnel)" } else { "" };
    match &status.state {
        ConnectionState::TunnelFailed(TunnelFailure::MissingUser) => {
            "direct connection failed and no ssh user is set; set [ssh] user or pass --ssh-user"
                .to_string()
        }
        ConnectionState::Connecting if status.attempt > 1 => {
            format!("connecting{via}, attempt {}", status.attempt)
        }
        state => format!("{state}{via}"),
    }
}
