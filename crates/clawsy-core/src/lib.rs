//! clawsy-core: shared protocol library for the Clawsy node client.
//!
//! Provides the wire frame types, the dialect-normalizing codec, device-id
//! derivation and the outbound event envelope. No I/O lives here.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{encode_response, parse_frame, CommandRequest, CorrelationId, Inbound};
pub use envelope::Envelope;
pub use error::{NodeError, NodeResult};
pub use identity::{device_id, short_id};
pub use messages::{ClientInfo, CommandOutcome, RpcError, RpcId, PROTOCOL_VERSION};
