//! The model database: a static table mapping printer model names to the
//! read/write keys, EEPROM address layout, and reset values that make a
//! waste-counter reset meaningful for that model.
//!
//! `original_source/reinkpy/epson.py` loads this from a runtime-parsed data
//! file; that file wasn't part of the retrieved source, so it's bundled
//! here as a Rust static table instead (see DESIGN.md). A handful of
//! representative entries are included, covering both a `rlen=1` model
//! family and the more common `rlen=2` family, each with a waste-counter
//! group and a platen-pad-counter group.

/// One address (or group of addresses sharing a description) inside a
/// model's EEPROM map.
#[derive(Debug, Clone, Copy)]
pub struct MemEntry {
    pub addr: &'static [u16],
    pub desc: &'static str,
    /// Value(s) to write on reset; defaults to `min`, which defaults to
    /// all zeros, per spec.
    pub reset: Option<&'static [u8]>,
    pub min: Option<&'static [u8]>,
}

impl MemEntry {
    /// The value written to each address in `addr` during a reset of this
    /// entry, paired element-for-element with `addr` from `reset` (or
    /// `min`, defaulting any missing element to 0) — matches
    /// `epson.py::_make_reset`'s `zip(addr, reset or min or [0] * len(addr))`.
    pub fn reset_values(&self) -> Vec<u8> {
        let source = self.reset.or(self.min);
        self.addr
            .iter()
            .enumerate()
            .map(|(i, _)| source.and_then(|values| values.get(i).copied()).unwrap_or(0))
            .collect()
    }

    pub fn is_waste_counter(&self) -> bool {
        matches_group(self.desc, "waste counter")
    }

    pub fn is_platen_pad_counter(&self) -> bool {
        matches_group(self.desc, "platen pad counter")
    }
}

fn matches_group(desc: &str, needle: &str) -> bool {
    desc.to_ascii_lowercase().contains(needle)
}

#[derive(Debug, Clone, Copy)]
pub struct RawSpec {
    pub brand: &'static str,
    pub id_vendor: u16,
    pub id_product: Option<u16>,
    pub rkey: u16,
    pub wkey: Option<[u8; 8]>,
    pub rlen: u8,
    pub wlen: u8,
    pub mem_low: u8,
    pub mem_high: u8,
    pub mem: &'static [MemEntry],
    /// Model name strings this record applies to, e.g. `["XP-205"]`.
    pub models: &'static [&'static str],
}

pub const DEFAULT_ID_VENDOR: u16 = 0x04B8;
pub const DEFAULT_RLEN: u8 = 2;
pub const DEFAULT_WLEN: u8 = 2;
pub const DEFAULT_MEM_LOW: u8 = 0x00;
pub const DEFAULT_MEM_HIGH: u8 = 0xFF;

const XP_205_MEM: &[MemEntry] = &[
    MemEntry {
        addr: &[0x14],
        desc: "Waste counter (main)",
        reset: None,
        min: None,
    },
    MemEntry {
        addr: &[0x4C],
        desc: "Waste counter (platen pad counter)",
        reset: None,
        min: None,
    },
    MemEntry {
        addr: &[0x18],
        desc: "First TI received time",
        reset: Some(&[0x00]),
        min: None,
    },
];

const L3110_MEM: &[MemEntry] = &[
    MemEntry {
        addr: &[0x6C, 0x6D],
        desc: "Waste counter (box A)",
        reset: None,
        min: None,
    },
    MemEntry {
        addr: &[0x75, 0x76],
        desc: "Waste counter (box B / platen pad counter)",
        reset: None,
        min: None,
    },
];

/// Representative model records. Real deployments would load many more
/// from the data file this table stands in for.
pub const DB: &[RawSpec] = &[
    RawSpec {
        brand: "Epson",
        id_vendor: DEFAULT_ID_VENDOR,
        id_product: Some(0x1122),
        rkey: 0x0003,
        wkey: Some(*b"Azzzzzzz"),
        rlen: 1,
        wlen: 1,
        mem_low: DEFAULT_MEM_LOW,
        mem_high: DEFAULT_MEM_HIGH,
        mem: XP_205_MEM,
        models: &["XP-205", "XP-202", "XP-208"],
    },
    RawSpec {
        brand: "Epson",
        id_vendor: DEFAULT_ID_VENDOR,
        id_product: Some(0x1433),
        rkey: 0x0058,
        wkey: Some(*b"Bxxxxxxx"),
        rlen: 2,
        wlen: 2,
        mem_low: DEFAULT_MEM_LOW,
        mem_high: DEFAULT_MEM_HIGH,
        mem: L3110_MEM,
        models: &["L3110", "L3150"],
    },
];

/// A concrete model spec bound to one device: immutable layout borrowed
/// from [`DB`], mutable `rkey`/`wkey` (both may be overwritten by
/// [`crate::epson::eeprom::find_rkey`]/[`crate::epson::eeprom::find_wkey`]
/// or by explicit configuration).
#[derive(Debug, Clone)]
pub struct Spec {
    base: &'static RawSpec,
    pub rkey: u16,
    pub wkey: Option<[u8; 8]>,
}

impl Spec {
    pub fn from_raw(base: &'static RawSpec) -> Self {
        Self {
            base,
            rkey: base.rkey,
            wkey: base.wkey,
        }
    }

    pub fn brand(&self) -> &'static str {
        self.base.brand
    }

    pub fn id_vendor(&self) -> u16 {
        self.base.id_vendor
    }

    pub fn id_product(&self) -> Option<u16> {
        self.base.id_product
    }

    pub fn rlen(&self) -> u8 {
        self.base.rlen
    }

    pub fn wlen(&self) -> u8 {
        self.base.wlen
    }

    pub fn mem_low(&self) -> u8 {
        self.base.mem_low
    }

    pub fn mem_high(&self) -> u8 {
        self.base.mem_high
    }

    pub fn mem(&self) -> &'static [MemEntry] {
        self.base.mem
    }

    pub fn models(&self) -> &'static [&'static str] {
        self.base.models
    }

    /// All addresses across entries whose description matches `needle`,
    /// deduplicated, in first-seen order. Groups are independent: an entry
    /// matching more than one needle contributes to each such group, just
    /// as `epson.py`'s per-pattern `get_mem(g)` loop does.
    fn addresses_matching(&self, needle: &str) -> Vec<u16> {
        let mut seen = Vec::new();
        for entry in self.base.mem {
            if matches_group(entry.desc, needle) {
                for &addr in entry.addr {
                    if !seen.contains(&addr) {
                        seen.push(addr);
                    }
                }
            }
        }
        seen
    }

    /// Addresses the `do_reset_All_waste_counters_*` aggregate operation
    /// writes atomically.
    pub fn waste_counter_addresses(&self) -> Vec<u16> {
        self.addresses_matching("waste counter")
    }

    /// Addresses the `do_reset_All_platen_pad_counters_*` aggregate
    /// operation writes atomically.
    pub fn platen_pad_counter_addresses(&self) -> Vec<u16> {
        self.addresses_matching("platen pad counter")
    }
}

/// Looks up a model by exact name match against any record's `models`
/// list, case-sensitively (model strings are vendor-issued and stable).
pub fn lookup(name: &str) -> Option<&'static RawSpec> {
    DB.iter().find(|r| r.models.contains(&name))
}

/// Every known model name across the whole database, for `list-models`.
pub fn list_models() -> Vec<&'static str> {
    DB.iter().flat_map(|r| r.models.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_model_by_name() {
        let raw = lookup("XP-205").expect("XP-205 should be in the bundled DB");
        assert_eq!(raw.rkey, 0x0003);
        assert_eq!(raw.rlen, 1);
    }

    #[test]
    fn waste_counter_addresses_groups_and_dedupes() {
        let spec = Spec::from_raw(lookup("L3110").unwrap());
        let addrs = spec.waste_counter_addresses();
        assert_eq!(addrs, vec![0x6C, 0x6D, 0x75, 0x76]);
    }

    #[test]
    fn list_models_includes_every_alias() {
        let models = list_models();
        assert!(models.contains(&"XP-202"));
        assert!(models.contains(&"L3150"));
    }
}
