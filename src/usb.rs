//! Bulk transport on top of libusb.

use crate::error::{Error, Result, TransportError};
use crate::transport::{BulkTransport, Endpoint, Timeout};
use log::{debug, trace};
use rusb::{Device, DeviceHandle, UsbContext};

/// Interface claimed for the bulk transfers. The OMAP ROM only exposes a single one.
const INTERFACE: u8 = 0;

/// A vendor/product identity pair as reported in a USB device descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

impl std::fmt::Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// Finds the first device on the bus matching the given identity.
pub(crate) fn find_device<T: UsbContext>(context: &T, id: UsbId) -> Result<Device<T>> {
    for device in context.devices()?.iter() {
        // Devices whose descriptor cannot be read are certainly not ours
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(_) => continue,
        };
        if descriptor.vendor_id() == id.vendor && descriptor.product_id() == id.product {
            return Ok(device);
        }
    }
    Err(Error::DeviceNotFound)
}

/// An open bulk endpoint of a libusb device.
pub struct UsbTransport<T: UsbContext> {
    /// USB device handle for the raw communication. `None` once closed.
    handle: Option<DeviceHandle<T>>,

    endpoint: Endpoint,

    timeout: Timeout,
}

impl<T: UsbContext> UsbTransport<T> {
    /// Opens the first device matching `id`, selects its default configuration and claims its
    /// interface for bulk transfers on `endpoint`.
    pub fn open(context: &T, id: UsbId, endpoint: u8) -> Result<Self> {
        let endpoint = Endpoint::new(endpoint)?;
        let device = find_device(context, id)?;
        Self::from_usb_device(device, endpoint)
    }

    /// Opens an already located device.
    pub fn from_usb_device(device: Device<T>, endpoint: Endpoint) -> Result<Self> {
        let configuration = device.config_descriptor(0)?.number();
        let mut handle = device.open()?;
        handle.set_active_configuration(configuration)?;
        handle.claim_interface(INTERFACE)?;
        debug!(
            "Opened USB device on bus {} address {}, endpoint {}",
            device.bus_number(),
            device.address(),
            endpoint
        );

        Ok(UsbTransport {
            handle: Some(handle),
            endpoint,
            timeout: Timeout::INDEFINITE,
        })
    }

    /// The endpoint this transport talks to.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn handle(&mut self) -> Result<&mut DeviceHandle<T>> {
        self.handle
            .as_mut()
            .ok_or(Error::Transport(TransportError::Closed))
    }
}

impl<T: UsbContext> BulkTransport for UsbTransport<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let address = self.endpoint.out_address();
        let timeout = self.timeout.as_duration();
        let written = self.handle()?.write_bulk(address, data, timeout)?;
        trace!("Wrote {} of {} bytes to 0x{:02x}", written, data.len(), address);
        if written != data.len() {
            return Err(TransportError::ShortWrite {
                expected: data.len(),
                actual: written,
            }
            .into());
        }
        Ok(written)
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        if max_len == 0 {
            return Err(Error::Configuration("zero-length read".into()));
        }
        let address = self.endpoint.in_address();
        let timeout = self.timeout.as_duration();
        let mut buffer = vec![0u8; max_len];
        let length = self.handle()?.read_bulk(address, &mut buffer, timeout)?;
        trace!("Read {} bytes from 0x{:02x}", length, address);
        buffer.truncate(length);
        Ok(buffer)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            // The device may already have vanished, in which case there is nothing to release
            let released = handle.release_interface(INTERFACE);
            drop(handle);
            debug!("Closed USB transport on endpoint {}", self.endpoint);
            match released {
                Ok(()) | Err(rusb::Error::NoDevice) | Err(rusb::Error::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Timeout {
        self.timeout
    }

    fn reopen_after_reenumeration(&self) -> bool {
        // libusb keeps talking to the second stage through the handle the ROM was opened with
        false
    }
}

impl<T: UsbContext> Drop for UsbTransport<T> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
