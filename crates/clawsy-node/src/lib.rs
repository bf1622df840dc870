//! clawsy-node: node protocol client for the Clawsy gateway.
//!
//! Holds a persistent Ed25519 device identity, connects to the gateway over
//! WebSocket (falling back to an SSH tunnel when the direct path fails),
//! answers the signed challenge handshake and then serves gateway commands
//! through pluggable capability providers behind a permission gate.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use clawsy_node::{
//!     ApprovalDecision, ConnectionConfig, KeyStore, NoCapabilities, NodeEngine, NodeOptions,
//!     NodeServices, StaticApprover,
//! };
//!
//! # async fn example() -> clawsy_core::NodeResult<()> {
//! let identity = KeyStore::default_location()?.load_or_generate()?;
//! let config = ConnectionConfig::new("agenthost", "secret-token");
//! let services = NodeServices::new(
//!     Arc::new(NoCapabilities),
//!     Arc::new(StaticApprover(ApprovalDecision::Deny)),
//! );
//!
//! let node = NodeEngine::spawn(config, identity, NodeOptions::default(), services);
//! node.connect().await?;
//! node.wait_for(|s| s.state == clawsy_node::ConnectionState::Paired).await?;
//! node.send_event("agent.request", serde_json::json!({"message": "hi"})).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod capabilities;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod files;
pub mod keystore;
pub mod permissions;
pub mod transport;
pub mod tunnel;

// Re-export primary public types.
pub use capabilities::{
    ApprovalDecision, ApprovalHandler, CapabilityError, CapabilityProvider, NoCapabilities,
    Notification, StaticApprover,
};
pub use config::ConnectionConfig;
pub use device::DeviceIdentity;
pub use engine::{
    ConnectionState, FailureReason, NodeEngine, NodeHandle, NodeOptions, NodeServices, NodeStatus,
};
pub use keystore::KeyStore;
pub use permissions::{PermissionCategory, PermissionGate};
pub use transport::TransportDiagnosis;
pub use tunnel::TunnelFailure;

// Re-export clawsy-core error types for convenience.
pub use clawsy_core::{NodeError, NodeResult};
