//! Discovery: enumerating candidate devices before a [`crate::Device`] is
//! opened. USB enumeration is synchronous and built in; network discovery
//! (mDNS-SD service browsing, SNMP sweep) is modeled as a trait only — no
//! mDNS or SNMP crate ships with this library, per spec.md §1's
//! out-of-scope list.

pub mod net;

#[cfg(feature = "usb")]
use crate::pipe::UsbPipe;

/// One device found during discovery, before any protocol handshake has
/// happened.
#[derive(Debug, Clone)]
pub enum Candidate {
    #[cfg(feature = "usb")]
    Usb(crate::pipe::UsbDeviceInfo),
    File(std::path::PathBuf),
    Network(net::ResolvedService),
}

/// Enumerates every USB printer-class interface currently attached.
#[cfg(feature = "usb")]
pub fn discover_usb() -> crate::pipe::Result<Vec<Candidate>> {
    Ok(UsbPipe::discover()?.into_iter().map(Candidate::Usb).collect())
}

/// Enumerates character-device nodes (`/dev/lp*`, `/dev/usb/lp*`).
pub fn discover_file_devices() -> Vec<Candidate> {
    crate::pipe::FilePipe::discover()
        .into_iter()
        .map(|p| Candidate::File(p.path().to_path_buf()))
        .collect()
}

/// Runs every discovery mechanism available in this build and aggregates
/// the results, matching `reinkpy/__init__.py::Device.find`'s
/// subclass-aggregation pattern. `resolver` is optional network discovery;
/// pass `None` to skip it (there is no default implementation).
pub fn find(
    timeout: std::time::Duration,
    resolver: Option<&mut dyn net::ServiceResolver>,
) -> Vec<Candidate> {
    let mut found = Vec::new();

    #[cfg(feature = "usb")]
    {
        match discover_usb() {
            Ok(mut usb) => found.append(&mut usb),
            Err(err) => log::warn!("USB discovery failed: {err}"),
        }
    }

    found.extend(discover_file_devices());

    if let Some(resolver) = resolver {
        match resolver.resolve(timeout) {
            Ok(services) => found.extend(services.into_iter().map(Candidate::Network)),
            Err(err) => log::warn!("network discovery failed: {err}"),
        }
    }

    found
}
