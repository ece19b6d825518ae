//! IEEE 1284.4 packet codec and session layer.
//!
//! Layered bottom-up: [`packet`] is the pure 6-byte header codec, [`tx`] is
//! the transaction-channel command/reply vocabulary, [`channel`] is the
//! per-channel bookkeeping, and [`link`] ties them together into the
//! credit-flow-controlled multiplexed session a [`crate::pipe::Pipe`]
//! carries.

pub mod channel;
pub mod link;
pub mod packet;
pub mod tx;

pub use channel::Channel;
pub use link::{Link, Received, TX_CID};
pub use packet::PacketHeader;
pub use tx::{Revision, TxCommand, TxReply};
