//! USB bulk byte pipe, backed by `rusb`.
//!
//! Mirrors `original_source/reinkpy/usb.py`'s `UsbIO`: find a printer-class
//! interface (`bDeviceClass`/`bInterfaceClass` == 0x07) with one bulk-IN and
//! one bulk-OUT endpoint at alternate setting 0, detach any kernel driver on
//! entry, reattach it on exit.

use super::{Error, Pipe, Result};
use std::time::Duration;

/// USB printer device class, per the USB-IF class spec.
const PRINTER_CLASS: u8 = 0x07;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub bus_number: u8,
    pub address: u8,
}

pub struct UsbPipe {
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    interface_number: u8,
    ep_in: u8,
    ep_out: u8,
    timeout: Duration,
    detached_kernel_driver: bool,
    info: UsbDeviceInfo,
}

impl std::fmt::Debug for UsbPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbPipe")
            .field("interface_number", &self.interface_number)
            .field("ep_in", &self.ep_in)
            .field("ep_out", &self.ep_out)
            .field("info", &self.info)
            .finish()
    }
}

impl UsbPipe {
    pub fn info(&self) -> &UsbDeviceInfo {
        &self.info
    }

    /// Lists every printer-class interface attached to the system.
    pub fn discover() -> Result<Vec<UsbDeviceInfo>> {
        let mut found = Vec::new();
        for device in rusb::devices()?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if !device_has_printer_interface(&device, &desc) {
                continue;
            }
            let info = describe(&device, &desc);
            found.push(info);
        }
        Ok(found)
    }

    /// Opens the first printer-class interface matching the given ids. A
    /// `None` field matches anything; `serial_number` (when `Some`) is
    /// checked after opening the device, since it requires a string
    /// descriptor read.
    pub fn open_matching(
        vendor_id: Option<u16>,
        product_id: Option<u16>,
        serial_number: Option<&str>,
    ) -> Result<Self> {
        for device in rusb::devices()?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if let Some(v) = vendor_id {
                if desc.vendor_id() != v {
                    continue;
                }
            }
            if let Some(p) = product_id {
                if desc.product_id() != p {
                    continue;
                }
            }
            if !device_has_printer_interface(&device, &desc) {
                continue;
            }
            let Some((interface_number, ep_in, ep_out)) = find_bulk_interface(&device) else {
                continue;
            };
            let handle = device.open()?;
            if let Some(expected) = serial_number {
                let matches = handle
                    .read_languages(DEFAULT_TIMEOUT)
                    .ok()
                    .and_then(|langs| langs.first().copied())
                    .and_then(|lang| {
                        handle
                            .read_serial_number_string(lang, &desc, DEFAULT_TIMEOUT)
                            .ok()
                    })
                    .map(|sn| sn == expected)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            let info = describe(&device, &desc);
            return Ok(UsbPipe {
                handle,
                interface_number,
                ep_in,
                ep_out,
                timeout: DEFAULT_TIMEOUT,
                detached_kernel_driver: false,
                info,
            });
        }
        Err(Error::NoMatchingInterface(format!(
            "vendor={vendor_id:?} product={product_id:?} serial={serial_number:?}"
        )))
    }
}

impl Pipe for UsbPipe {
    fn open(&mut self) -> Result<()> {
        if self.handle.kernel_driver_active(self.interface_number).unwrap_or(false) {
            self.handle.detach_kernel_driver(self.interface_number)?;
            self.detached_kernel_driver = true;
        }
        self.handle.claim_interface(self.interface_number)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.handle.release_interface(self.interface_number);
        if self.detached_kernel_driver {
            self.handle.attach_kernel_driver(self.interface_number)?;
            self.detached_kernel_driver = false;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.handle.write_bulk(self.ep_out, data, self.timeout)?)
    }

    fn read(&mut self, max: Option<usize>) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max.unwrap_or(512)];
        let n = self.handle.read_bulk(self.ep_in, &mut buf, self.timeout)?;
        buf.truncate(n);
        Ok(buf)
    }
}

fn device_has_printer_interface(
    device: &rusb::Device<rusb::GlobalContext>,
    desc: &rusb::DeviceDescriptor,
) -> bool {
    if desc.class_code() == PRINTER_CLASS {
        return true;
    }
    let Ok(config) = device.config_descriptor(0) else {
        return false;
    };
    config
        .interfaces()
        .flat_map(|i| i.descriptors())
        .any(|d| d.class_code() == PRINTER_CLASS)
}

/// Finds the alt-setting-0 interface exposing one bulk-IN and one bulk-OUT
/// endpoint, returning `(interface_number, ep_in, ep_out)`.
fn find_bulk_interface(device: &rusb::Device<rusb::GlobalContext>) -> Option<(u8, u8, u8)> {
    let config = device.config_descriptor(0).ok()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors().filter(|d| d.setting_number() == 0) {
            let mut ep_in = None;
            let mut ep_out = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != rusb::TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    rusb::Direction::In => ep_in = Some(endpoint.address()),
                    rusb::Direction::Out => ep_out = Some(endpoint.address()),
                }
            }
            if let (Some(i), Some(o)) = (ep_in, ep_out) {
                return Some((descriptor.interface_number(), i, o));
            }
        }
    }
    None
}

fn describe(
    device: &rusb::Device<rusb::GlobalContext>,
    desc: &rusb::DeviceDescriptor,
) -> UsbDeviceInfo {
    let (manufacturer, product, serial_number) = device
        .open()
        .ok()
        .and_then(|handle| {
            let lang = handle.read_languages(DEFAULT_TIMEOUT).ok()?.first().copied()?;
            Some((
                handle.read_manufacturer_string(lang, desc, DEFAULT_TIMEOUT).ok(),
                handle.read_product_string(lang, desc, DEFAULT_TIMEOUT).ok(),
                handle.read_serial_number_string(lang, desc, DEFAULT_TIMEOUT).ok(),
            ))
        })
        .unwrap_or((None, None, None));
    UsbDeviceInfo {
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        serial_number,
        manufacturer,
        product,
        bus_number: device.bus_number(),
        address: device.address(),
    }
}
