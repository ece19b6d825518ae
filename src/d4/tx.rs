//! Transaction-channel command tables for 1284.4 revisions 0x10 and 0x20.
//!
//! The two revisions agree on every command's *logical* fields; they only
//! differ in a handful of extra zero-padding fields on the wire
//! (`OpenChannel`, `CloseChannel`, `CreditRequest`). Rather than generate a
//! struct format per revision (as the Python original does via
//! `_make_tx_command`), each revision gets its own `encode`/`decode`
//! arm on a shared, revision-agnostic set of types — the "tagged union"
//! called for in the design notes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    R0x10,
    R0x20,
}

impl Revision {
    pub fn as_u8(self) -> u8 {
        match self {
            Revision::R0x10 => 0x10,
            Revision::R0x20 => 0x20,
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x10 => Some(Revision::R0x10),
            0x20 => Some(Revision::R0x20),
            _ => None,
        }
    }
}

/// A request sent on the transaction channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxCommand {
    Init {
        revision: u8,
    },
    OpenChannel {
        sid_p: u8,
        sid_s: u8,
        max_pts: u16,
        max_stp: u16,
        max_credit: u16,
    },
    CloseChannel {
        sid_p: u8,
        sid_s: u8,
    },
    Credit {
        sid_p: u8,
        sid_s: u8,
        add_credit: u16,
    },
    CreditRequest {
        sid_p: u8,
        sid_s: u8,
        max_credit: u16,
    },
    Exit,
    GetSocketId {
        service_name: String,
    },
    GetServiceName {
        socket_id: u8,
    },
}

impl TxCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TxCommand::Init { .. } => "Init",
            TxCommand::OpenChannel { .. } => "OpenChannel",
            TxCommand::CloseChannel { .. } => "CloseChannel",
            TxCommand::Credit { .. } => "Credit",
            TxCommand::CreditRequest { .. } => "CreditRequest",
            TxCommand::Exit => "Exit",
            TxCommand::GetSocketId { .. } => "GetSocketId",
            TxCommand::GetServiceName { .. } => "GetServiceName",
        }
    }

    fn opcode(&self) -> u8 {
        match self {
            TxCommand::Init { .. } => 0x00,
            TxCommand::OpenChannel { .. } => 0x01,
            TxCommand::CloseChannel { .. } => 0x02,
            TxCommand::Credit { .. } => 0x03,
            TxCommand::CreditRequest { .. } => 0x04,
            TxCommand::Exit => 0x08,
            TxCommand::GetSocketId { .. } => 0x09,
            TxCommand::GetServiceName { .. } => 0x0A,
        }
    }

    /// Default `OpenChannel` request, per spec.md §4.D.
    pub fn open_channel(sid_p: u8, sid_s: u8) -> Self {
        TxCommand::OpenChannel {
            sid_p,
            sid_s,
            max_pts: 0x100,
            max_stp: 0x100,
            max_credit: 0,
        }
    }

    /// Default `CreditRequest`, per spec.md §4.D (`max=0`).
    pub fn credit_request(sid_p: u8, sid_s: u8) -> Self {
        TxCommand::CreditRequest {
            sid_p,
            sid_s,
            max_credit: 0,
        }
    }

    pub fn encode(&self, revision: Revision) -> Vec<u8> {
        let mut buf = vec![self.opcode()];
        match self {
            TxCommand::Init { revision: r } => buf.write_u8(*r).unwrap(),
            TxCommand::OpenChannel {
                sid_p,
                sid_s,
                max_pts,
                max_stp,
                max_credit,
            } => {
                buf.write_u8(*sid_p).unwrap();
                buf.write_u8(*sid_s).unwrap();
                buf.write_u16::<BigEndian>(*max_pts).unwrap();
                buf.write_u16::<BigEndian>(*max_stp).unwrap();
                buf.write_u16::<BigEndian>(*max_credit).unwrap();
                if revision == Revision::R0x10 {
                    buf.write_u16::<BigEndian>(0).unwrap(); // initCredit padding
                }
            }
            TxCommand::CloseChannel { sid_p, sid_s } => {
                buf.write_u8(*sid_p).unwrap();
                buf.write_u8(*sid_s).unwrap();
                if revision == Revision::R0x10 {
                    buf.write_u8(0).unwrap(); // x1 padding
                }
            }
            TxCommand::Credit {
                sid_p,
                sid_s,
                add_credit,
            } => {
                buf.write_u8(*sid_p).unwrap();
                buf.write_u8(*sid_s).unwrap();
                buf.write_u16::<BigEndian>(*add_credit).unwrap();
            }
            TxCommand::CreditRequest {
                sid_p,
                sid_s,
                max_credit,
            } => {
                buf.write_u8(*sid_p).unwrap();
                buf.write_u8(*sid_s).unwrap();
                if revision == Revision::R0x20 {
                    buf.write_u16::<BigEndian>(*max_credit).unwrap();
                } else {
                    buf.write_u16::<BigEndian>(0x0080).unwrap(); // x1
                    buf.write_u16::<BigEndian>(0xffff).unwrap(); // x2
                }
            }
            TxCommand::Exit => {}
            TxCommand::GetSocketId { service_name } => {
                buf.extend_from_slice(service_name.as_bytes());
            }
            TxCommand::GetServiceName { socket_id } => buf.write_u8(*socket_id).unwrap(),
        }
        buf
    }
}

/// A reply received on the transaction channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxReply {
    InitReply {
        result: u8,
        revision: u8,
    },
    OpenChannelReply {
        result: u8,
        sid_p: u8,
        sid_s: u8,
        max_pts: u16,
        max_stp: u16,
        max_credit: u16,
        granted_credit: u16,
    },
    CloseChannelReply {
        result: u8,
        sid_p: u8,
        sid_s: u8,
    },
    CreditReply {
        result: u8,
        sid_p: u8,
        sid_s: u8,
    },
    CreditRequestReply {
        result: u8,
        sid_p: u8,
        sid_s: u8,
        add_credit: u16,
    },
    ExitReply {
        result: u8,
    },
    GetSocketIdReply {
        result: u8,
        socket_id: u8,
        service_name: String,
    },
    GetServiceNameReply {
        result: u8,
        socket_id: u8,
        service_name: String,
    },
    /// Asynchronous error report, opcode 0x7F. See [`ERRORS`].
    Error {
        error_psid: u8,
        error_ssid: u8,
        error_code: u8,
    },
}

impl TxReply {
    pub fn name(&self) -> &'static str {
        match self {
            TxReply::InitReply { .. } => "InitReply",
            TxReply::OpenChannelReply { .. } => "OpenChannelReply",
            TxReply::CloseChannelReply { .. } => "CloseChannelReply",
            TxReply::CreditReply { .. } => "CreditReply",
            TxReply::CreditRequestReply { .. } => "CreditRequestReply",
            TxReply::ExitReply { .. } => "ExitReply",
            TxReply::GetSocketIdReply { .. } => "GetSocketIdReply",
            TxReply::GetServiceNameReply { .. } => "GetServiceNameReply",
            TxReply::Error { .. } => "Error",
        }
    }

    /// The `(sidP, sidS)` the reply's piggybacked credit (if any) applies
    /// to, and the amount. Only `CreditRequestReply` carries one, matching
    /// `d4.py::TXChannel.on_received`'s `hasattr(p, 'addCredit')` check.
    pub fn piggybacked_credit(&self) -> Option<((u8, u8), u16)> {
        match self {
            TxReply::CreditRequestReply {
                sid_p,
                sid_s,
                add_credit,
                ..
            } => Some(((*sid_p, *sid_s), *add_credit)),
            _ => None,
        }
    }
}

/// Cursor that degrades to `0` once the input is exhausted, implementing
/// the "tolerate truncated replies" rule: some devices reply short, and
/// missing trailing fields are treated as zero rather than an error.
struct TruncatingCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TruncatingCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.bytes.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let hi = self.u8();
        let lo = self.u8();
        u16::from_be_bytes([hi, lo])
    }

    fn rest_ascii(&self) -> String {
        String::from_utf8_lossy(&self.bytes[self.pos.min(self.bytes.len())..]).into_owned()
    }
}

/// Decodes a transaction-channel reply opcode + body.
pub fn decode_reply(bytes: &[u8]) -> Option<TxReply> {
    let opcode = *bytes.first()?;
    let mut c = TruncatingCursor::new(&bytes[1..]);
    Some(match opcode {
        0x80 => TxReply::InitReply {
            result: c.u8(),
            revision: c.u8(),
        },
        0x81 => TxReply::OpenChannelReply {
            result: c.u8(),
            sid_p: c.u8(),
            sid_s: c.u8(),
            max_pts: c.u16(),
            max_stp: c.u16(),
            max_credit: c.u16(),
            granted_credit: c.u16(),
        },
        0x82 => TxReply::CloseChannelReply {
            result: c.u8(),
            sid_p: c.u8(),
            sid_s: c.u8(),
        },
        0x83 => TxReply::CreditReply {
            result: c.u8(),
            sid_p: c.u8(),
            sid_s: c.u8(),
        },
        0x84 => TxReply::CreditRequestReply {
            result: c.u8(),
            sid_p: c.u8(),
            sid_s: c.u8(),
            add_credit: c.u16(),
        },
        0x88 => TxReply::ExitReply { result: c.u8() },
        0x89 => TxReply::GetSocketIdReply {
            result: c.u8(),
            socket_id: c.u8(),
            service_name: c.rest_ascii(),
        },
        0x8A => TxReply::GetServiceNameReply {
            result: c.u8(),
            socket_id: c.u8(),
            service_name: c.rest_ascii(),
        },
        0x7F => TxReply::Error {
            error_psid: c.u8(),
            error_ssid: c.u8(),
            error_code: c.u8(),
        },
        _ => return None,
    })
}

/// 1284.4 asynchronous error codes, verbatim from spec.md §4.D.
pub const ERRORS: &[(u8, &str)] = &[
    (0x80, "A malformed packet was received. All fields in the packet shall be ignored."),
    (0x81, "A packet was received for which no credit had been granted. The packet was ignored."),
    (0x82, "A 1284.4 reply was received that could not be matched to an outstanding command. The reply was ignored. Credit granted in the reply was ignored."),
    (0x83, "A packet of data was received that was larger than the negotiated maximum size for the socket indicated. The data was ignored"),
    (0x84, "A data packet was received for a channel that was not open."),
    (0x85, "A reply packet with an unknown Result value was received."),
    (0x86, "Piggybacked credit received in a data packet caused a credit overflow for that channel."),
    (0x87, "A reserved or deprecated IEEE 1284.4 command or reply was received. Any piggybacked credit was ignored."),
];

pub fn error_message(code: u8) -> &'static str {
    ERRORS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, m)| *m)
        .unwrap_or("unknown 1284.4 error code")
}
