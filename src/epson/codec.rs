//! Epson control-message framing and the factory-command checksum.
//!
//! Every message sent to the control channel is a 2-byte ASCII command, a
//! little-endian `u16` length, then the payload (`original_source/reinkpy/epson.py::ctrl`).
//! "Factory" commands additionally double the command's ASCII character as
//! a marker (e.g. `b"||"`) and wrap an inner one-byte opcode in a
//! three-byte checksum triplet keyed by the current read/write key.

use byteorder::{LittleEndian, WriteBytesExt};

/// Computes the three checksum bytes the printer expects to follow a
/// factory-command opcode: the opcode itself, its bitwise complement, and
/// the opcode rotated right by one bit.
///
/// Verified against the two literal vectors `epson.py` documents:
/// `checksum_triplet(b'A')` is `(0x41, 0xBE, 0xA0)` and
/// `checksum_triplet(b'B')` is `(0x42, 0xBD, 0x21)`.
pub fn checksum_triplet(c: u8) -> (u8, u8, u8) {
    (c, !c, c.rotate_right(1))
}

/// Builds the generic `cmd + u16-LE length + payload` control-message
/// envelope.
pub fn build_message(cmd: [u8; 2], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&cmd);
    buf.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
    buf.extend_from_slice(payload);
    buf
}

/// Encodes the inner factory-command opcode: `rkey` (u16 LE) followed by
/// the checksum triplet for `inner`.
pub fn encode_factory_opcode(rkey: u16, inner: u8) -> [u8; 5] {
    let (c, not_c, rot) = checksum_triplet(inner);
    let rkey_bytes = rkey.to_le_bytes();
    [rkey_bytes[0], rkey_bytes[1], c, not_c, rot]
}

/// Builds a full factory command: the outer ASCII char doubled (e.g.
/// `b'|'` -> `b"||"`), then the factory-opcode encoding, then any
/// additional payload (e.g. an EEPROM address), all framed by
/// [`build_message`].
pub fn build_factory_command(outer: u8, inner: u8, rkey: u16, extra: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5 + extra.len());
    payload.extend_from_slice(&encode_factory_opcode(rkey, inner));
    payload.extend_from_slice(extra);
    build_message([outer, outer], &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_triplet_matches_documented_vectors() {
        assert_eq!(checksum_triplet(b'A'), (0x41, 0xBE, 0xA0));
        assert_eq!(checksum_triplet(b'B'), (0x42, 0xBD, 0x21));
    }

    #[test]
    fn build_message_frames_cmd_and_le_length() {
        let msg = build_message(*b"di", b"\x01");
        assert_eq!(msg, vec![b'd', b'i', 0x01, 0x00, 0x01]);
    }

    #[test]
    fn factory_command_wraps_opcode_with_rkey_and_extra() {
        let cmd = build_factory_command(b'|', b'A', 0x1234, &[0xAA, 0xBB]);
        // "||" + u16-LE length + (rkey-LE + triplet + extra)
        assert_eq!(&cmd[0..2], b"||");
        let len = u16::from_le_bytes([cmd[2], cmd[3]]);
        assert_eq!(len as usize, cmd.len() - 4);
        let payload = &cmd[4..];
        assert_eq!(&payload[0..2], &[0x34, 0x12]);
        assert_eq!(&payload[2..5], &[0x41, 0xBE, 0xA0]);
        assert_eq!(&payload[5..], &[0xAA, 0xBB]);
    }
}
