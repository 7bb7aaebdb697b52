use thiserror::Error;

/// Errors produced while decoding a bit stream.
///
/// The decoder processes untrusted network data; every malformed input must
/// surface here instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// The stream ended while more bits were expected
    #[error("Bit stream ended after {read_bits} bits while more data was expected")]
    EndOfStream { read_bits: usize },

    /// A decoded value does not fit the target type
    #[error("Decoded value does not fit the target type")]
    ValueOutOfRange,

    /// A decoded byte sequence is not valid UTF-8
    #[error("Decoded string is not valid UTF-8")]
    InvalidUtf8,
}
