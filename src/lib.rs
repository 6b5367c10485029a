//! This crate boots a TI OMAP44xx SoC over USB through the peripheral boot protocol of its mask ROM.
//!
//! The ROM only offers this protocol when the chip is reset with USB connected and no battery
//! inserted. It accepts a small second stage (x-loader), which brings up the memory and in turn
//! accepts a full third stage (usually U-Boot). Once that is uploaded, the device is on its own.
//!
//! # Example: Booting
//! ```rust, no_run
//! use omapboot::{BootConfig, BootSession, Context, DeviceLocator, Image, TargetInfo};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Pick a USB backend and wait for the ROM to show up
//! let context = Context::new(TargetInfo::default())?;
//! let locator = DeviceLocator::new(context);
//! let mut session = BootSession::connect(locator, BootConfig::default(), true)?;
//!
//! // Fetch information about the chip
//! print!("{}", session.id()?);
//!
//! // Upload x-loader, wait for it to come up, then upload U-Boot
//! let x_loader = Image::open("MLO")?;
//! let u_boot = Image::open("u-boot.bin")?;
//! session.boot(x_loader, u_boot, false)?;
//!
//! println!("Done!");
//! # Ok(())
//! # }
//! ```
//!
//! Uploads can also be run on their own with progress feedback. See the [`Operation`] trait for
//! details, and the [`mock`] module for exercising the protocol without hardware.
//!
//! [`Operation`]: trait.Operation.html
//! [`mock`]: mock/index.html

extern crate log;
extern crate rusb;

#[cfg(unix)]
extern crate libc;

mod asic_id;
mod cancel;
mod config;
mod context;
mod error;
mod hex;
mod locator;
pub mod mock;
mod operation;
mod session;
mod transport;
#[cfg(unix)]
pub mod ugen;
mod usb;

pub use asic_id::{record_type, split_records, AsicId, ChannelState, IdRecord, RawRecord};
pub use cancel::CancelToken;
pub use config::{BootConfig, ReconnectMode};
pub use context::{select_backend, BackendKind, Context, TargetInfo, TransportOpener};
pub use error::{Error, ErrorKind, Result, TransportError};
pub use hex::Hex;
pub use locator::{Clock, DeviceLocator, RetryPolicy, SystemClock};
pub use operation::{Image, Operation, Upload};
pub use rusb::UsbContext;
pub use session::{BootSession, Command, OperatorGate, State, StdinGate, BANNER};
pub use transport::{BulkTransport, Endpoint, Timeout};
pub use usb::{UsbId, UsbTransport};

use std::time::Duration;

/// USB identity of the OMAP4430 ROM.
pub const OMAP4430_ROM: UsbId = UsbId {
    vendor: 0x0451,
    product: 0xd00f,
};

/// Bulk endpoint the ROM talks on.
pub const DEFAULT_ENDPOINT: u8 = 1;

/// Delay between two attempts at opening a device which is not there (yet).
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time the second stage gets to initialise before it is talked to.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Buffer size for reading the ASIC ID. The actual ID is much shorter.
pub const ID_READ_LENGTH: usize = 1 << 10;

/// Size of the chunks images are uploaded in.
pub const UPLOAD_CHUNK_SIZE: usize = 4096;
