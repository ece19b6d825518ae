//! Pure IEEE 1284.4 packet header codec — 6 bytes, big-endian, no semantic
//! interpretation.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Length of the wire header, in bytes.
pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub psid: u8,
    pub ssid: u8,
    /// Total packet length, header included.
    pub length: u16,
    pub credit: u8,
    pub control: u8,
}

impl PacketHeader {
    pub fn cid(&self) -> (u8, u8) {
        (self.psid, self.ssid)
    }

    pub fn payload_length(&self) -> usize {
        self.length.saturating_sub(HEADER_LEN as u16) as usize
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("packet too short: need at least {HEADER_LEN} bytes, got {0}")]
    Truncated(usize),
}

/// Decodes a header from the front of `bytes`, returning the header and the
/// remaining (unconsumed) bytes. `bytes` must contain at least
/// [`HEADER_LEN`] bytes; anything beyond the header is returned verbatim,
/// regardless of the header's declared `length` (callers slice the payload
/// out themselves once they know enough of it has arrived).
pub fn decode(bytes: &[u8]) -> Result<(PacketHeader, &[u8]), Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Truncated(bytes.len()));
    }
    let mut cur = &bytes[..HEADER_LEN];
    let psid = cur.read_u8().unwrap();
    let ssid = cur.read_u8().unwrap();
    let length = cur.read_u16::<BigEndian>().unwrap();
    let credit = cur.read_u8().unwrap();
    let control = cur.read_u8().unwrap();
    Ok((
        PacketHeader {
            psid,
            ssid,
            length,
            credit,
            control,
        },
        &bytes[HEADER_LEN..],
    ))
}

/// Encodes a packet: `length` is computed as `HEADER_LEN + payload.len()`.
pub fn encode(payload: &[u8], psid: u8, ssid: u8, credit: u8, control: u8) -> Vec<u8> {
    let length = (HEADER_LEN + payload.len()) as u16;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.write_u8(psid).unwrap();
    buf.write_u8(ssid).unwrap();
    buf.write_u16::<BigEndian>(length).unwrap();
    buf.write_u8(credit).unwrap();
    buf.write_u8(control).unwrap();
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let payload = b"hello 1284.4";
        let encoded = encode(payload, 0x02, 0x02, 1, 0);
        let (header, rest) = decode(&encoded).unwrap();
        assert_eq!(header.psid, 0x02);
        assert_eq!(header.ssid, 0x02);
        assert_eq!(header.cid(), (0x02, 0x02));
        assert_eq!(header.length as usize, HEADER_LEN + payload.len());
        assert_eq!(header.payload_length(), payload.len());
        assert_eq!(rest, payload);
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(decode(&[0u8; 5]), Err(Error::Truncated(5))));
    }

    #[test]
    fn encode_defaults_match_spec() {
        // credit=1, control=0 are the documented defaults used when sending.
        let b = encode(b"", 0, 0, 1, 0);
        assert_eq!(b, vec![0x00, 0x00, 0x00, 0x06, 0x01, 0x00]);
    }
}
