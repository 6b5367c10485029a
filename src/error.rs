use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io;
use std::result::Result as StdResult;

/// Errors which can occur while locating, talking to and booting a target.
#[derive(Debug)]
pub enum Error {
    /// No matching device was found, or the transport to it could not be constructed.
    DeviceNotFound,

    /// A parameter was outside of its valid range (e.g. endpoint 0 or a zero chunk size).
    Configuration(String),

    /// A length field did not agree with the amount of data actually available.
    Framing {
        /// Number of bytes announced or required.
        expected: usize,
        /// Number of bytes actually present.
        actual: usize,
    },

    /// The target answered with something it is not allowed to say at this point.
    ProtocolViolation {
        /// Which field or message was checked.
        what: &'static str,
        /// The value the protocol requires, formatted for display.
        expected: String,
        /// The value the target delivered, formatted for display.
        actual: String,
    },

    /// The underlying USB mechanism reported an error.
    Transport(TransportError),

    /// Local I/O failed, e.g. reading a boot image or prompting on the console.
    Io(io::Error),

    /// The operation was aborted through a [`CancelToken`].
    ///
    /// [`CancelToken`]: struct.CancelToken.html
    Cancelled,
}

/// Failures surfaced from one of the bulk transport backends.
#[derive(Debug)]
pub enum TransportError {
    /// An error reported by libusb.
    Usb(rusb::Error),

    /// An error reported by the operating system for a raw device file.
    Io(io::Error),

    /// The device signalled end-of-stream where data was required.
    EndOfStream,

    /// A write returned without transmitting the complete buffer.
    ShortWrite {
        /// Bytes handed to the backend.
        expected: usize,
        /// Bytes the backend reported as transmitted.
        actual: usize,
    },

    /// The transport was used after it had been closed.
    Closed,
}

/// Coarse classification of an [`Error`], e.g. for choosing an exit status.
///
/// [`Error`]: enum.Error.html
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    DeviceNotFound,
    Configuration,
    Framing,
    ProtocolViolation,
    Transport,
    Io,
    Cancelled,
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceNotFound => ErrorKind::DeviceNotFound,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Framing { .. } => ErrorKind::Framing,
            Error::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Io(_) => ErrorKind::Io,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn violation(
        what: &'static str,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        Error::ProtocolViolation {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Transport(TransportError::Usb(err)) => Some(err),
            Error::Transport(TransportError::Io(err)) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        match self {
            Error::DeviceNotFound => fmt.write_str("Device not found"),
            Error::Configuration(reason) => write!(fmt, "Invalid configuration: {}", reason),
            Error::Framing { expected, actual } => write!(
                fmt,
                "Framing error: expected {} bytes, found {}",
                expected, actual
            ),
            Error::ProtocolViolation {
                what,
                expected,
                actual,
            } => write!(
                fmt,
                "Protocol violation in {}: expected {}, found {}",
                what, expected, actual
            ),
            Error::Transport(err) => write!(fmt, "Transport error: {}", err),
            Error::Io(err) => write!(fmt, "I/O error: {}", err),
            Error::Cancelled => fmt.write_str("Cancelled"),
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        match self {
            TransportError::Usb(err) => write!(fmt, "{}", err),
            TransportError::Io(err) => write!(fmt, "{}", err),
            TransportError::EndOfStream => fmt.write_str("unexpected end of stream"),
            TransportError::ShortWrite { expected, actual } => write!(
                fmt,
                "short write: {} of {} bytes transmitted",
                actual, expected
            ),
            TransportError::Closed => fmt.write_str("transport already closed"),
        }
    }
}

impl From<rusb::Error> for Error {
    fn from(error: rusb::Error) -> Self {
        Error::Transport(TransportError::Usb(error))
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Transport(TransportError::Io(error))
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        Error::Transport(error)
    }
}

/// Shorthand for a Result with the crate's own Error type.
pub type Result<T> = StdResult<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(Error::DeviceNotFound.kind(), ErrorKind::DeviceNotFound);
        assert_eq!(
            Error::from(rusb::Error::Timeout).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            Error::Framing {
                expected: 4,
                actual: 2
            }
            .kind(),
            ErrorKind::Framing
        );
    }

    #[test]
    fn violation_reports_both_values() {
        let err = Error::violation("banner", "0xaabbccdd", "0x00000000");
        assert_eq!(
            err.to_string(),
            "Protocol violation in banner: expected 0xaabbccdd, found 0x00000000"
        );
    }
}
