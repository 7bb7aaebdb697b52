use thiserror::Error;

use scenesync_shared::WireError;

/// Fatal, per-connection protocol failures.
///
/// Any of these aborts the offending connection's inbound batch for the
/// tick and moves the connection to `Disconnecting`; the external registry
/// is expected to force-close it. Other connections and the scene are not
/// affected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// The frame could not be decoded (truncated, malformed, unknown id)
    #[error("Malformed frame: {0}")]
    Malformed(#[from] WireError),

    /// An attribute block exceeded the encoding size limit
    #[error("Attribute block of {size} bytes exceeds the {limit}-byte limit")]
    EncodingOverflow { size: usize, limit: usize },
}
