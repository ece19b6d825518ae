//! Talks to Epson inkjet printers over USB (IEEE 1284.4) to read and reset
//! printer-internal EEPROM state, most notably the waste-ink counters whose
//! exhaustion is the usual reason a printer refuses to print.
//!
//! The crate is layered bottom-up:
//!
//! * [`pipe`] — a byte pipe abstraction over USB bulk endpoints or a raw
//!   character device.
//! * [`d4`] — the IEEE 1284.4 packet codec and session layer (channels,
//!   credit flow control, the transaction channel).
//! * [`epson`] — the Epson control-message codec, EEPROM read/write
//!   operations and the bundled model database.
//! * [`device`] — the user-facing façade: discovery, model detection, and
//!   the registry of reset operations.
//!
//! Printing, firmware flashing, and bypassing any printer security beyond
//! what the factory commands already allow are out of scope.

#![warn(rust_2018_idioms)]

pub mod d4;
pub mod device;
pub mod discovery;
pub mod epson;
pub mod pipe;

pub use device::Device;
pub use pipe::Pipe;
