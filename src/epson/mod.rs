//! The Epson proprietary control protocol layered on top of 1284.4:
//! message framing, factory-command EEPROM read/write, and the bundled
//! model database.

pub mod codec;
pub mod control;
pub mod eeprom;
pub mod model;

pub use control::{ControlChannel, D4Control, SnmpControl, SnmpOidWriter};
pub use model::{MemEntry, RawSpec, Spec};

/// The 1284.4 entry preamble Epson printers expect before `Init`, per
/// spec.md §6.
pub const PREAMBLE: &[u8] = b"\x00\x00\x00\x1B\x01@EJL 1284.4\n@EJL\n@EJL\n";

/// The reply marker polled for after sending [`PREAMBLE`].
pub const REPLY_MARKER: &[u8] = &[0x00, 0x00, 0x00, 0x08, 0x01, 0x00, 0xC5, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Link(#[from] crate::d4::link::Error),

    #[error(transparent)]
    Pipe(#[from] crate::pipe::Error),

    #[error("no reply received before the retry budget was exhausted")]
    ReplyTimeout,

    #[error("malformed EEPROM reply: {0:?}")]
    MalformedReply(Vec<u8>),

    #[error("no write key configured for this model")]
    NoWriteKey,

    #[error("write to address {addr:#06x} was not acknowledged")]
    WriteNotAcknowledged { addr: u16 },

    #[error("write to address {addr:#06x} failed readback verification: expected {expected:#04x}, got {actual:#04x}")]
    ReadbackMismatch { addr: u16, expected: u8, actual: u8 },

    #[error("no candidate key produced a valid response")]
    KeyNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
