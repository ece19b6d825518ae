//! The user-facing façade: IEEE 1284 identification parsing, model
//! auto-detection, and the registry of reset operations a caller can run
//! without knowing anything about factory commands or EEPROM addresses.
//!
//! Grounded in `original_source/reinkpy/__init__.py::Device`/`UsbDevice`
//! and `epson.py::Epson` (model selection, `_mem_ops`/reset-operation
//! generation, `do_status`/`do_rw`, `find_rkey`/`find_wkey`, `search_bin`).

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::epson::control::ControlChannel;
use crate::epson::model::{self, MemEntry, RawSpec, Spec};
use crate::epson::{eeprom, Error as EpsonError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Epson(#[from] EpsonError),

    #[error("no model configured; call configure() first")]
    NoModelConfigured,

    #[error("no operation named {0:?}")]
    UnknownOperation(String),

    #[error("no reset-waste operation is defined for this model")]
    NoWasteResetOperation,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which model to associate with a device, per `epson.py::Epson.configure`.
pub enum ModelSelection<'a> {
    /// Detect from the parsed identification string.
    Autodetect,
    /// Unassign whatever model is currently configured.
    Clear,
    /// Force a specific model name from the bundled database.
    Named(&'a str),
}

/// One reset action a model spec makes available. Replaces the Python
/// original's `__getattr__`/`dir()` reflection trick (`epson.py::_mem_ops`)
/// with an explicit, enumerable list — see spec's REDESIGN FLAGS.
#[derive(Debug, Clone)]
pub struct ResetOperation {
    pub id: String,
    pub description: String,
    pub writes: Vec<(u16, u8)>,
}

const WASTE_OP_PREFIX: &str = "do_reset_All_waste_counters_";
const PLATEN_OP_PREFIX: &str = "do_reset_All_platen_pad_counters_";

fn slugify(desc: &str) -> String {
    desc.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn addrs_hex(addrs: &[u16]) -> String {
    addrs.iter().map(|a| format!("{a:04x}")).collect::<Vec<_>>().join("")
}

/// Builds the per-entry operations plus one aggregate operation per
/// grouping pattern ("waste counter", "platen pad counter"), matching
/// `epson.py::_mem_ops`'s `for g in ('waste counter', 'platen pad
/// counter'): yield self._make_reset(**self.spec.get_mem(g))` — two
/// distinct aggregate operations, not one operation merging both patterns.
fn build_operations(spec: &Spec) -> Vec<ResetOperation> {
    let mut ops = Vec::new();
    for entry in spec.mem() {
        ops.push(single_entry_operation(entry));
    }
    push_aggregate_operation(
        &mut ops,
        WASTE_OP_PREFIX,
        "All waste counters",
        spec.waste_counter_addresses(),
    );
    push_aggregate_operation(
        &mut ops,
        PLATEN_OP_PREFIX,
        "All platen pad counters",
        spec.platen_pad_counter_addresses(),
    );
    ops
}

fn push_aggregate_operation(
    ops: &mut Vec<ResetOperation>,
    id_prefix: &str,
    description: &str,
    addrs: Vec<u16>,
) {
    if addrs.is_empty() {
        return;
    }
    let writes = addrs.iter().map(|&a| (a, 0u8)).collect();
    ops.push(ResetOperation {
        id: format!("{id_prefix}{}", addrs_hex(&addrs)),
        description: description.to_string(),
        writes,
    });
}

fn single_entry_operation(entry: &MemEntry) -> ResetOperation {
    let writes = entry
        .addr
        .iter()
        .copied()
        .zip(entry.reset_values())
        .collect();
    ResetOperation {
        id: format!("do_reset_{}_{}", slugify(entry.desc), addrs_hex(entry.addr)),
        description: entry.desc.to_string(),
        writes,
    }
}

/// Splits a raw IEEE 1284 device-id string (`"MFG:EPSON;MDL:XP-205
/// Series;CMD:ESCPL2,BDC;"`) into a key/value map, aliasing the common keys
/// to their long forms and splitting `COMMAND SET`/`CMD` on commas.
/// Mirrors `reinkpy/__init__.py::_parse_ieee1284_id`.
pub fn parse_ieee1284_id(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for field in raw.split(';') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let canonical = match key {
            "MANUFACTURER" => "MFG",
            "MODEL" => "MDL",
            "COMMAND SET" => "CMD",
            other => other,
        };
        out.insert(canonical.to_string(), value.to_string());
    }
    out
}

/// A device bound to a control channel (1284.4 or SNMP) and, once
/// configured, a model spec and its derived operation registry.
pub struct Device<C> {
    ctrl: C,
    /// Device-level fields (USB/SNMP descriptor strings) set via
    /// [`Device::set_info`] — highest priority.
    device_info: BTreeMap<String, String>,
    /// Fields parsed out of the IEEE 1284 identification string by
    /// [`Device::refresh_identification`] — lowest priority.
    identification_info: BTreeMap<String, String>,
    spec: Option<Spec>,
    operations: Vec<ResetOperation>,
}

impl<C: ControlChannel> Device<C> {
    pub fn new(ctrl: C) -> Self {
        Self {
            ctrl,
            device_info: BTreeMap::new(),
            identification_info: BTreeMap::new(),
            spec: None,
            operations: Vec::new(),
        }
    }

    /// Sends the `di` identification request and merges the parsed reply
    /// into the identification layer of `info`. Never touches the
    /// device-level layer, so a field set via [`Device::set_info`] stays
    /// shadowing whatever the identification string says, even if this is
    /// called afterward.
    pub fn refresh_identification(&mut self) -> Result<()> {
        let reply = self.ctrl.send_message(*b"di", b"\x01")?;
        let text = String::from_utf8_lossy(&reply);
        let Some(rest) = text.strip_prefix("@EJL ID") else {
            return Ok(());
        };
        for (k, v) in parse_ieee1284_id(rest.trim_start()) {
            self.identification_info.insert(k, v);
        }
        Ok(())
    }

    /// Sets a device-level field (e.g. a USB descriptor string), which
    /// takes priority over whatever `refresh_identification` parses for the
    /// same key.
    pub fn set_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.device_info.insert(key.into(), value.into());
    }

    /// A layered view of device info: device-level fields overlaid on the
    /// parsed IEEE 1284 identification string, device-level winning on key
    /// collisions — ported from the `ChainMap({}, io.info, epson.info)`
    /// pattern.
    pub fn info(&self) -> BTreeMap<String, String> {
        let mut merged = self.identification_info.clone();
        merged.extend(self.device_info.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    fn lookup_info<'a>(&'a self, keys: &[&str]) -> Option<&'a str> {
        keys.iter()
            .find_map(|k| self.device_info.get(*k).or_else(|| self.identification_info.get(*k)))
            .map(String::as_str)
    }

    pub fn brand(&self) -> Option<&str> {
        self.lookup_info(&["brand", "MFG", "MANUFACTURER"])
    }

    pub fn model(&self) -> Option<&str> {
        self.lookup_info(&["model", "MDL", "MODEL"])
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.lookup_info(&["SN", "serial_number"])
    }

    /// The model name with any trailing `" Series"` stripped, matching
    /// `epson.py::Epson.detected_model`.
    pub fn detected_model(&self) -> Option<&str> {
        self.model().map(|m| m.strip_suffix(" Series").unwrap_or(m))
    }

    /// Selects (or clears) the model spec driving the operation registry.
    pub fn configure(&mut self, selection: ModelSelection<'_>) -> Result<()> {
        match selection {
            ModelSelection::Clear => {
                self.spec = None;
                self.operations.clear();
            }
            ModelSelection::Autodetect => {
                let name = self.detected_model().map(str::to_string);
                self.configure_named(name.as_deref())?;
            }
            ModelSelection::Named(name) => {
                if let Some(detected) = self.detected_model() {
                    if detected != name {
                        log::warn!(
                            "configuring model {name:?}, but the device identifies as {detected:?}"
                        );
                    }
                }
                self.configure_named(Some(name))?;
            }
        }
        Ok(())
    }

    fn configure_named(&mut self, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            self.spec = None;
            self.operations.clear();
            return Ok(());
        };
        let raw: &'static RawSpec = model::lookup(name).ok_or(Error::NoModelConfigured)?;
        let spec = Spec::from_raw(raw);
        self.operations = build_operations(&spec);
        self.spec = Some(spec);
        Ok(())
    }

    pub fn spec(&self) -> Option<&Spec> {
        self.spec.as_ref()
    }

    pub fn list_operations(&self) -> &[ResetOperation] {
        &self.operations
    }

    /// Runs the named reset operation as one atomic EEPROM write.
    pub fn run_operation(&mut self, id: &str) -> Result<bool> {
        let spec = self.spec.as_ref().ok_or(Error::NoModelConfigured)?;
        let op = self
            .operations
            .iter()
            .find(|op| op.id == id)
            .ok_or_else(|| Error::UnknownOperation(id.to_string()))?
            .clone();
        Ok(eeprom::write_eeprom(&mut self.ctrl, spec, &op.writes, true)?)
    }

    /// Runs the first operation whose id begins with
    /// `do_reset_All_waste_counters_`, per `epson.py::Epson.reset_waste`.
    pub fn reset_waste(&mut self) -> Result<bool> {
        let id = self
            .operations
            .iter()
            .find(|op| op.id.starts_with(WASTE_OP_PREFIX))
            .map(|op| op.id.clone())
            .ok_or(Error::NoWasteResetOperation)?;
        self.run_operation(&id)
    }

    pub fn read_eeprom(&mut self, addresses: &[u16]) -> Result<Vec<(u16, Option<u8>)>> {
        let spec = self.spec.as_ref().ok_or(Error::NoModelConfigured)?;
        Ok(eeprom::read_eeprom(&mut self.ctrl, spec, addresses)?)
    }

    pub fn write_eeprom(&mut self, pairs: &[(u16, u8)], check_read: bool) -> Result<bool> {
        let spec = self.spec.as_ref().ok_or(Error::NoModelConfigured)?;
        Ok(eeprom::write_eeprom(&mut self.ctrl, spec, pairs, check_read)?)
    }

    pub fn find_rkey(&mut self, known_addr: u16, range: impl Iterator<Item = u16>) -> Result<Option<u16>> {
        let spec = self.spec.as_mut().ok_or(Error::NoModelConfigured)?;
        Ok(eeprom::find_rkey(&mut self.ctrl, spec, known_addr, range)?)
    }

    pub fn find_wkey(
        &mut self,
        candidates: &[[u8; 8]],
        addr: Option<u16>,
    ) -> Result<Option<[u8; 8]>> {
        let spec = self.spec.as_mut().ok_or(Error::NoModelConfigured)?;
        Ok(eeprom::find_wkey(&mut self.ctrl, spec, candidates, addr)?)
    }

    /// `('st', 0x01)` diagnostic status request, per `epson.py::do_status`.
    pub fn do_status(&mut self) -> Result<Vec<u8>> {
        Ok(self.ctrl.send_message(*b"st", &[0x01])?)
    }

    /// `('rw', 0x00 || sha1(serial_number))` diagnostic request, per
    /// `epson.py::do_rw`.
    pub fn do_rw(&mut self) -> Result<Vec<u8>> {
        let serial = self.serial_number().unwrap_or_default().to_string();
        let mut payload = vec![0x00u8];
        payload.extend_from_slice(&Sha1::digest(serial.as_bytes()));
        Ok(self.ctrl.send_message(*b"rw", &payload)?)
    }
}

/// One hit from [`search_bin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMatch {
    /// A factory-command byte pattern (`||<len><rkey><cmd triplet>`).
    FactoryCommand { offset: usize, cmd: u8, rkey: u16, length: u16 },
    /// A run of 8 printable ASCII bytes, yielded as a write-key candidate
    /// when `yield_raw` is set.
    CandidateKey { offset: usize, bytes: [u8; 8] },
}

/// Scans a byte blob (a pcap capture, a firmware dump, …) for factory
/// command occurrences and, if `yield_raw` is set, 8-printable-ASCII-char
/// runs that might be write-key candidates. Grounded in
/// `epson.py::search_bin`'s regex scan.
pub fn search_bin(data: &[u8], yield_raw: bool) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    let mut i = 0;
    while i + 8 <= data.len() {
        if &data[i..i + 2] == b"||" {
            let length = u16::from_be_bytes([data[i + 2], data[i + 3]]);
            let rkey = u16::from_le_bytes([data[i + 4], data[i + 5]]);
            let triplet = (data[i + 6], data[i + 7], data.get(i + 8).copied().unwrap_or(0));
            if triplet == (0x41, 0xBE, 0xA0) || triplet == (0x42, 0xBD, 0x21) {
                matches.push(SearchMatch::FactoryCommand {
                    offset: i,
                    cmd: triplet.0,
                    rkey,
                    length,
                });
            }
        }
        i += 1;
    }

    if yield_raw {
        let mut run_start = None;
        for (idx, &b) in data.iter().enumerate() {
            let printable = (0x20..=0x7e).contains(&b);
            match (printable, run_start) {
                (true, None) => run_start = Some(idx),
                (false, Some(start)) => {
                    emit_candidate_runs(data, start, idx, &mut matches);
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            emit_candidate_runs(data, start, data.len(), &mut matches);
        }
    }

    matches
}

fn emit_candidate_runs(data: &[u8], start: usize, end: usize, matches: &mut Vec<SearchMatch>) {
    let mut offset = start;
    while offset + 8 <= end {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        matches.push(SearchMatch::CandidateKey { offset, bytes });
        offset += 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ieee1284_id_with_aliases() {
        let fields = parse_ieee1284_id("MFG:EPSON;MDL:XP-205 Series;CMD:ESCPL2,BDC;");
        assert_eq!(fields.get("MFG").map(String::as_str), Some("EPSON"));
        assert_eq!(fields.get("MDL").map(String::as_str), Some("XP-205 Series"));
        assert_eq!(fields.get("CMD").map(String::as_str), Some("ESCPL2,BDC"));
    }

    #[test]
    fn long_form_keys_alias_to_short_form() {
        let fields = parse_ieee1284_id("MANUFACTURER:EPSON;MODEL:L3110;COMMAND SET:ESCPL2;");
        assert_eq!(fields.get("MFG").map(String::as_str), Some("EPSON"));
        assert_eq!(fields.get("MDL").map(String::as_str), Some("L3110"));
        assert_eq!(fields.get("CMD").map(String::as_str), Some("ESCPL2"));
    }

    #[test]
    fn build_operations_includes_per_entry_and_waste_aggregate() {
        let raw = model::lookup("XP-205").unwrap();
        let spec = Spec::from_raw(raw);
        let ops = build_operations(&spec);
        assert!(ops.iter().any(|op| op.id.starts_with(WASTE_OP_PREFIX)));
        assert!(ops.len() > 1);
    }

    #[test]
    fn build_operations_keeps_waste_and_platen_aggregates_separate() {
        let raw = model::lookup("L3110").unwrap();
        let spec = Spec::from_raw(raw);
        let ops = build_operations(&spec);
        let waste = ops.iter().find(|op| op.id.starts_with(WASTE_OP_PREFIX)).unwrap();
        let platen = ops.iter().find(|op| op.id.starts_with(PLATEN_OP_PREFIX)).unwrap();
        assert_eq!(waste.writes.len(), 4);
        assert_eq!(platen.writes.len(), 2);
    }

    #[test]
    fn multi_address_entry_pairs_each_reset_byte_with_its_own_address() {
        let raw = model::lookup("L3110").unwrap();
        let spec = Spec::from_raw(raw);
        let entry = spec.mem()[0];
        assert_eq!(entry.addr, &[0x6C, 0x6D]);
        let op = single_entry_operation(&entry);
        assert_eq!(op.writes, vec![(0x6C, 0), (0x6D, 0)]);
    }

    #[test]
    fn search_bin_finds_read_and_write_factory_commands() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(b"||");
        data.extend_from_slice(&9u16.to_be_bytes());
        data.extend_from_slice(&0x0003u16.to_le_bytes());
        data.extend_from_slice(&[0x41, 0xBE, 0xA0]);
        let matches = search_bin(&data, false);
        assert_eq!(
            matches,
            vec![SearchMatch::FactoryCommand {
                offset: 4,
                cmd: 0x41,
                rkey: 0x0003,
                length: 9,
            }]
        );
    }

    #[test]
    fn search_bin_yields_candidate_keys_when_requested() {
        let data = b"\x00\x00Azzzzzzz\x00\x00".to_vec();
        let matches = search_bin(&data, true);
        assert!(matches.contains(&SearchMatch::CandidateKey {
            offset: 2,
            bytes: *b"Azzzzzzz",
        }));
    }
}
