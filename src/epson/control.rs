//! Control-channel abstraction the EEPROM layer sends factory commands
//! through. Two implementors exist: [`D4Control`], which rides the 1284.4
//! `EPSON-CTRL` channel, and [`SnmpControl`], an interface-only stand-in
//! for the network/SNMP variant (`original_source/reinkpy/epson.py`'s
//! `EpsonSNMP`) — no SNMP wire code ships in this crate (see spec's
//! out-of-scope list), only the OID-path construction and a trait seam a
//! caller can plug a real SNMP client into.

use super::codec;
use super::Error;
use crate::d4::Link;
use crate::pipe::Pipe;

/// Channel the Epson firmware listens for control messages on.
pub const SERVICE_NAME: &str = "EPSON-CTRL";
/// Default `(psid, ssid)` for the control channel, per spec.md §6.
pub const DEFAULT_CID: (u8, u8) = (0x02, 0x02);

/// Anything able to send a factory command and collect its ASCII reply.
pub trait ControlChannel {
    fn send_factory(&mut self, outer: u8, inner: u8, rkey: u16, extra: &[u8]) -> Result<Vec<u8>, Error>;

    /// Sends a plain (non-factory) control message, e.g. the `di`
    /// identification request.
    fn send_message(&mut self, cmd: [u8; 2], payload: &[u8]) -> Result<Vec<u8>, Error>;
}

/// 1284.4-backed control channel.
pub struct D4Control<P: Pipe> {
    link: Link<P>,
    cid: (u8, u8),
}

impl<P: Pipe> D4Control<P> {
    /// Enters the link and opens the `EPSON-CTRL` channel.
    pub fn open(mut link: Link<P>) -> Result<Self, Error> {
        link.enter()?;
        let cid = link.get_channel(Some(SERVICE_NAME), Some(DEFAULT_CID))?;
        Ok(Self { link, cid })
    }

    pub fn link(&self) -> &Link<P> {
        &self.link
    }

    /// Closes the control channel and exits the link.
    pub fn close(mut self) -> Result<(), Error> {
        self.link.close_channel_scope(self.cid)?;
        self.link.exit()?;
        Ok(())
    }

    /// Reads data-channel replies until one contains a terminating `;`
    /// (every Epson control reply is `;`-terminated ASCII) or the retry
    /// budget is exhausted.
    fn read_reply(&mut self) -> Result<Vec<u8>, Error> {
        let mut collected = Vec::new();
        for _ in 0..16 {
            if let Some(received) = self.link.retreive()? {
                if received.cid == self.cid {
                    collected.extend_from_slice(&received.payload);
                    if collected.contains(&b';') {
                        return Ok(collected);
                    }
                }
            }
        }
        Err(Error::ReplyTimeout)
    }
}

impl<P: Pipe> ControlChannel for D4Control<P> {
    fn send_factory(&mut self, outer: u8, inner: u8, rkey: u16, extra: &[u8]) -> Result<Vec<u8>, Error> {
        let frame = codec::build_factory_command(outer, inner, rkey, extra);
        self.link.send(&frame, self.cid, 1, 0)?;
        self.read_reply()
    }

    fn send_message(&mut self, cmd: [u8; 2], payload: &[u8]) -> Result<Vec<u8>, Error> {
        let frame = codec::build_message(cmd, payload);
        self.link.send(&frame, self.cid, 1, 0)?;
        self.read_reply()
    }
}

/// Something that can perform a raw SNMP set/get against one OID and
/// return the response bytes the printer's MIB maps it to. No
/// implementation ships with this crate; callers bring their own SNMP
/// client (see DESIGN.md).
pub trait SnmpOidWriter {
    fn write_oid(&mut self, oid: &str, value: &[u8]) -> Result<Vec<u8>, Error>;
}

/// The SNMP enterprise OID Epson's firmware exposes its IEEE1284 device-id
/// string (and, by the same mechanism, factory commands) under.
pub const OID_PRINTER_IEEE1284_DEVICE_ID: &str = "1.3.6.1.4.1.2699.1.2.1.2.1.1.3.1";

pub struct SnmpControl<W> {
    writer: W,
    oid_prefix: String,
}

impl<W: SnmpOidWriter> SnmpControl<W> {
    pub fn new(writer: W, oid_prefix: impl Into<String>) -> Self {
        Self {
            writer,
            oid_prefix: oid_prefix.into(),
        }
    }
}

/// Builds `oid_prefix` followed by one decimal OID arc per byte of
/// `frame`, matching `epson.py`'s
/// `'.'.join((self.link.OID_CTRL, *(str(b) for b in m)))`.
fn frame_to_oid(oid_prefix: &str, frame: &[u8]) -> String {
    let mut oid = oid_prefix.to_string();
    for byte in frame {
        oid.push('.');
        oid.push_str(&byte.to_string());
    }
    oid
}

impl<W: SnmpOidWriter> ControlChannel for SnmpControl<W> {
    fn send_factory(&mut self, outer: u8, inner: u8, rkey: u16, extra: &[u8]) -> Result<Vec<u8>, Error> {
        let frame = codec::build_factory_command(outer, inner, rkey, extra);
        let oid = frame_to_oid(&self.oid_prefix, &frame);
        self.writer.write_oid(&oid, &frame)
    }

    fn send_message(&mut self, cmd: [u8; 2], payload: &[u8]) -> Result<Vec<u8>, Error> {
        let frame = codec::build_message(cmd, payload);
        let oid = frame_to_oid(&self.oid_prefix, &frame);
        self.writer.write_oid(&oid, &frame)
    }
}
