//! The blocking bulk transport contract shared by all USB backends.

use crate::error::{Error, Result, TransportError};
use std::convert::TryFrom;
use std::fmt;
use std::time::Duration;

/// A bulk endpoint number. Endpoint 0 is the control endpoint and therefore never valid here.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Endpoint(u8);

impl Endpoint {
    /// Validates an endpoint number, accepting 1 to 15.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use omapboot::Endpoint;
    ///
    /// assert!(Endpoint::new(1).is_ok());
    /// assert!(Endpoint::new(0).is_err());
    /// assert!(Endpoint::new(16).is_err());
    /// ```
    pub fn new(number: u8) -> Result<Self> {
        match number {
            0 => Err(Error::Configuration(
                "endpoint 0 is the control endpoint, not a bulk endpoint".into(),
            )),
            1..=15 => Ok(Self(number)),
            n => Err(Error::Configuration(format!(
                "endpoint {} does not fit into 4 bits",
                n
            ))),
        }
    }

    /// The raw 4-bit endpoint number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// The `bEndpointAddress` for transfers from the device to the host.
    pub fn in_address(self) -> u8 {
        0x80 | self.0
    }

    /// The `bEndpointAddress` for transfers from the host to the device.
    pub fn out_address(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Endpoint {
    type Error = Error;

    fn try_from(number: u8) -> Result<Self> {
        Endpoint::new(number)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer timeout in milliseconds. `None` waits indefinitely.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Timeout(Option<u32>);

impl Timeout {
    /// Never time out.
    pub const INDEFINITE: Timeout = Timeout(None);

    /// Builds a timeout from a millisecond count. Zero is normalised to "indefinite", which is what
    /// both libusb and ugen(4) take it to mean.
    pub fn from_millis(millis: Option<u32>) -> Self {
        match millis {
            Some(0) | None => Timeout(None),
            Some(ms) => Timeout(Some(ms)),
        }
    }

    /// Converts a duration, rejecting anything which does not fit into 32 bits of milliseconds.
    pub fn from_duration(duration: Option<Duration>) -> Result<Self> {
        match duration {
            None => Ok(Timeout(None)),
            Some(d) => u32::try_from(d.as_millis())
                .map(|ms| Timeout::from_millis(Some(ms)))
                .map_err(|_| {
                    Error::Configuration(format!(
                        "timeout of {} ms exceeds 32 bits",
                        d.as_millis()
                    ))
                }),
        }
    }

    /// The configured millisecond value, `None` meaning indefinite.
    pub fn millis(self) -> Option<u32> {
        self.0
    }

    /// The value as understood by the raw device ioctl, where 0 means indefinite.
    pub fn as_raw_millis(self) -> u32 {
        self.0.unwrap_or(0)
    }

    /// The value as understood by libusb, where a zero duration means indefinite.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(u64::from(self.as_raw_millis()))
    }
}

/// Uniform blocking I/O over a single USB bulk endpoint.
///
/// Implementations guarantee that `write` transmits the whole buffer or fails, and that `read`
/// returns between 1 and `max_len` bytes, fails after the configured timeout, or returns an empty
/// buffer only to signal end-of-stream.
pub trait BulkTransport {
    /// Writes the complete buffer, returning its length.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Reads at most `max_len` bytes, blocking for up to the configured timeout.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Tears the transport down immediately. Any further transfer fails.
    fn close(&mut self) -> Result<()>;

    /// Configures the timeout used by all subsequent transfers.
    fn set_timeout(&mut self, timeout: Timeout) -> Result<()>;

    /// The timeout currently in effect.
    fn timeout(&self) -> Timeout;

    /// Whether a fresh handle has to be opened to talk to the firmware a device re-enumerated as.
    fn reopen_after_reenumeration(&self) -> bool;

    /// Reads until exactly `len` bytes have been received.
    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let chunk = self.read(len - data.len())?;
            if chunk.is_empty() {
                return Err(TransportError::EndOfStream.into());
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

impl<T: BulkTransport + ?Sized> BulkTransport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        (**self).read(max_len)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Timeout {
        (**self).timeout()
    }

    fn reopen_after_reenumeration(&self) -> bool {
        (**self).reopen_after_reenumeration()
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        (**self).read_exact(len)
    }
}
