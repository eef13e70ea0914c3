use serde::{Deserialize, Serialize};

/// Protocol id used when none is configured explicitly
pub const DEFAULT_PROTOCOL: &str = "/tether/rpc/1.0.0";

/// Response header
///
/// An empty `error` means success. The reply frame follows this header on
/// the wire whether or not `error` is set, and readers must drain it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub error: String,
}
