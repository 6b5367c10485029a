//! Bulk transport on top of the BSD ugen(4) character devices.
//!
//! ugen(4) exposes every endpoint of an unclaimed USB device as its own file. Bulk endpoints behave
//! much like `SOCK_SEQPACKET` sockets: the driver does no buffering, so by default a `read()` has to
//! ask for exactly the size of the arriving packet or it fails with an I/O error. Enabling short
//! transfers lifts this, which allows reading with a generous upper bound instead.

use crate::error::{Error, Result, TransportError};
use crate::transport::{BulkTransport, Endpoint, Timeout};
use log::{debug, trace};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

/// `_IOW('U', 113, int)` from `<dev/usb/usb.h>`.
const USB_SET_SHORT_XFER: u32 = 0x8004_5571;

/// `_IOW('U', 114, int)` from `<dev/usb/usb.h>`.
const USB_SET_TIMEOUT: u32 = 0x8004_5572;

/// Device node of a ugen(4) endpoint.
pub fn device_path(bus: u8, endpoint: Endpoint) -> PathBuf {
    PathBuf::from(format!("/dev/ugen{}.{:02}", bus, endpoint.number()))
}

/// An open ugen(4) bulk endpoint.
pub struct UgenTransport {
    /// `None` once closed.
    file: Option<File>,

    path: PathBuf,

    timeout: Timeout,
}

impl UgenTransport {
    /// Opens `/dev/ugen<bus>.<endpoint>` and enables short transfers on it.
    pub fn open(bus: u8, endpoint: u8) -> Result<Self> {
        let endpoint = Endpoint::new(endpoint)?;
        let path = device_path(bus, endpoint);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                trace!("Could not open {}: {}", path.display(), err);
                match err.raw_os_error() {
                    Some(libc::ENOENT) | Some(libc::ENXIO) | Some(libc::ENODEV) => {
                        Error::DeviceNotFound
                    }
                    _ => err.into(),
                }
            })?;
        debug!("Opened {}", path.display());

        let mut transport = UgenTransport {
            file: Some(file),
            path,
            timeout: Timeout::INDEFINITE,
        };
        transport.ioctl(USB_SET_SHORT_XFER, 1)?;
        transport.ioctl(USB_SET_TIMEOUT, 0)?;
        Ok(transport)
    }

    /// The device node this transport talks to.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or(Error::Transport(TransportError::Closed))
    }

    /// Issues an `_IOW` ioctl taking a single `int`.
    fn ioctl(&mut self, request: u32, value: u32) -> Result<()> {
        let fd = self.file()?.as_raw_fd();
        let mut value = value as libc::c_int;
        // Safety: `fd` is an open descriptor owned by `self.file` and the request only reads the
        // `int` behind the pointer for the duration of the call.
        let result = unsafe { libc::ioctl(fd, request as _, &mut value as *mut libc::c_int) };
        if result < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl BulkTransport for UgenTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file()?.write_all(data)?;
        trace!("Wrote {} bytes to {}", data.len(), self.path.display());
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        if max_len == 0 {
            return Err(Error::Configuration("zero-length read".into()));
        }
        let mut buffer = vec![0u8; max_len];
        let length = self.file()?.read(&mut buffer)?;
        trace!("Read {} bytes from {}", length, self.path.display());
        buffer.truncate(length);
        Ok(buffer)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the file closes the descriptor right away
        if self.file.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
        self.ioctl(USB_SET_TIMEOUT, timeout.as_raw_millis())?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Timeout {
        self.timeout
    }

    fn reopen_after_reenumeration(&self) -> bool {
        // The node is torn down and recreated when the device re-enumerates
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn path_layout() {
        let endpoint = Endpoint::new(1).unwrap();
        assert_eq!(device_path(0, endpoint), PathBuf::from("/dev/ugen0.01"));
        let endpoint = Endpoint::new(12).unwrap();
        assert_eq!(device_path(3, endpoint), PathBuf::from("/dev/ugen3.12"));
    }

    #[test]
    fn invalid_endpoint_fails_before_opening() {
        assert_eq!(
            UgenTransport::open(0, 0).err().map(|e| e.kind()),
            Some(ErrorKind::Configuration)
        );
        assert_eq!(
            UgenTransport::open(0, 16).err().map(|e| e.kind()),
            Some(ErrorKind::Configuration)
        );
    }
}
