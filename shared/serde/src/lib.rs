//! # Scenesync Serde
//! Bit-level serialization primitives shared by the scenesync protocol
//! crates: a bit-granular writer/reader pair, variable-length integers, and
//! the [`Serde`] trait implemented by every wire type.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod bit_reader;
mod bit_writer;
mod error;
mod integer;
mod serde;

pub use bit_reader::BitReader;
pub use bit_writer::{BitCounter, BitWrite, BitWriter};
pub use error::SerdeErr;
pub use integer::UnsignedVariableInteger;
pub use serde::Serde;
