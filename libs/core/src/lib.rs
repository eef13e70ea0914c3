//! Tether Core - identity types shared by the fabric and rpc layers

pub mod ids;

pub use ids::{PeerId, ProtocolId, ServiceId};
