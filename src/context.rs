use crate::error::{Error, Result};
use crate::transport::{BulkTransport, Endpoint};
use crate::usb::{UsbId, UsbTransport};
use crate::{DEFAULT_ENDPOINT, OMAP4430_ROM};
use log::debug;

/// Something which can (re)open a transport to the target, e.g. for [`DeviceLocator`].
///
/// [`DeviceLocator`]: struct.DeviceLocator.html
pub trait TransportOpener {
    /// Makes a single attempt at opening a transport. Fails with `DeviceNotFound` if the device is
    /// not present.
    fn open(&self) -> Result<Box<dyn BulkTransport>>;
}

impl<O: TransportOpener + ?Sized> TransportOpener for &O {
    fn open(&self) -> Result<Box<dyn BulkTransport>> {
        (**self).open()
    }
}

/// Identifies the device to boot, in the terms each backend understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TargetInfo {
    /// Vendor/product pair used by the libusb backend.
    pub usb_id: UsbId,

    /// ugen(4) bus index used by the raw-device backend, which cannot match on the USB identity.
    pub ugen_bus: u8,

    /// Bulk endpoint number.
    pub endpoint: u8,
}

impl Default for TargetInfo {
    fn default() -> Self {
        TargetInfo {
            usb_id: OMAP4430_ROM,
            ugen_bus: 0,
            endpoint: DEFAULT_ENDPOINT,
        }
    }
}

/// The USB access mechanisms a transport can be built on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    /// libusb through rusb.
    Libusb,

    /// BSD ugen(4) device files.
    Ugen,
}

/// Chooses a backend from what the host offers. libusb is preferred; ugen(4) is only a fallback on
/// the BSD family, where unclaimed devices show up as device files.
pub fn select_backend(libusb_available: bool, os: &str) -> Option<BackendKind> {
    if libusb_available {
        Some(BackendKind::Libusb)
    } else if os.ends_with("bsd") || os == "dragonfly" {
        Some(BackendKind::Ugen)
    } else {
        None
    }
}

enum Backend {
    Libusb(rusb::Context),
    #[cfg(unix)]
    Ugen,
}

/// Host USB access, bound to one target device.
pub struct Context {
    backend: Backend,
    target: TargetInfo,
}

impl Context {
    /// Probes the host for a usable USB backend.
    pub fn new(target: TargetInfo) -> Result<Self> {
        Endpoint::new(target.endpoint)?;

        let usb_context = rusb::Context::new();
        if let Err(ref err) = usb_context {
            debug!("libusb unavailable: {}", err);
        }

        let backend = match select_backend(usb_context.is_ok(), std::env::consts::OS) {
            Some(BackendKind::Libusb) => Backend::Libusb(usb_context?),
            #[cfg(unix)]
            Some(BackendKind::Ugen) => {
                log::warn!(
                    "ugen(4) cannot match devices by USB identity, assuming /dev/ugen{} is {}",
                    target.ugen_bus, target.usb_id
                );
                Backend::Ugen
            }
            _ => return Err(usb_context.err().map_or(Error::DeviceNotFound, Error::from)),
        };

        Ok(Context { backend, target })
    }

    /// Uses an existing libusb context.
    pub fn with_usb_context(usb_context: rusb::Context, target: TargetInfo) -> Result<Self> {
        Endpoint::new(target.endpoint)?;
        Ok(Context {
            backend: Backend::Libusb(usb_context),
            target,
        })
    }

    /// The backend chosen by the probe.
    pub fn backend(&self) -> BackendKind {
        match self.backend {
            Backend::Libusb(_) => BackendKind::Libusb,
            #[cfg(unix)]
            Backend::Ugen => BackendKind::Ugen,
        }
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }
}

impl TransportOpener for Context {
    fn open(&self) -> Result<Box<dyn BulkTransport>> {
        match &self.backend {
            Backend::Libusb(usb_context) => Ok(Box::new(UsbTransport::open(
                usb_context,
                self.target.usb_id,
                self.target.endpoint,
            )?)),
            #[cfg(unix)]
            Backend::Ugen => Ok(Box::new(crate::ugen::UgenTransport::open(
                self.target.ugen_bus,
                self.target.endpoint,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libusb_is_preferred() {
        assert_eq!(select_backend(true, "linux"), Some(BackendKind::Libusb));
        assert_eq!(select_backend(true, "openbsd"), Some(BackendKind::Libusb));
    }

    #[test]
    fn ugen_only_on_bsd() {
        assert_eq!(select_backend(false, "openbsd"), Some(BackendKind::Ugen));
        assert_eq!(select_backend(false, "freebsd"), Some(BackendKind::Ugen));
        assert_eq!(select_backend(false, "netbsd"), Some(BackendKind::Ugen));
        assert_eq!(select_backend(false, "linux"), None);
        assert_eq!(select_backend(false, "windows"), None);
    }

    #[test]
    fn default_target_is_omap4430_rom() {
        let target = TargetInfo::default();
        assert_eq!(target.usb_id.vendor, 0x0451);
        assert_eq!(target.usb_id.product, 0xd00f);
        assert_eq!(target.endpoint, 1);
    }
}
