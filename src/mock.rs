//! Scripted stand-ins for the USB side, for exercising the protocol without hardware.
//!
//! # Example
//!
//! ```rust
//! use omapboot::mock::MockTransport;
//! use omapboot::BulkTransport;
//!
//! let mut transport = MockTransport::new().reply(&[0xdd, 0xcc, 0xbb, 0xaa]);
//! let probe = transport.clone();
//!
//! transport.write(&[1, 2, 3]).unwrap();
//! assert_eq!(transport.read(64).unwrap(), vec![0xdd, 0xcc, 0xbb, 0xaa]);
//! assert_eq!(probe.written(), vec![1, 2, 3]);
//! ```

use crate::context::TransportOpener;
use crate::error::{Error, Result, TransportError};
use crate::locator::Clock;
use crate::transport::{BulkTransport, Timeout};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    fail_write_at: Option<usize>,
    closed: bool,
    timeout: Timeout,
}

/// A transport answering reads from a queue of canned packets and recording everything written.
///
/// Clones share their state, so a clone kept by a test can inspect a transport after it has been
/// handed over to a session.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
    reopen: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a packet to be returned by a future read.
    pub fn reply(self, packet: &[u8]) -> Self {
        self.state.borrow_mut().replies.push_back(packet.to_vec());
        self
    }

    /// Makes the transport report that it has to be reopened after re-enumeration.
    pub fn reopen_after_reenumeration(mut self, reopen: bool) -> Self {
        self.reopen = reopen;
        self
    }

    /// Makes the `index`th write (counting from 0) fail.
    pub fn fail_write_at(self, index: usize) -> Self {
        self.state.borrow_mut().fail_write_at = Some(index);
        self
    }

    /// Every buffer written so far, one entry per write call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.borrow().writes.clone()
    }

    /// All bytes written so far, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().writes.concat()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Number of queued packets not yet read.
    pub fn pending_replies(&self) -> usize {
        self.state.borrow().replies.len()
    }
}

impl BulkTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(TransportError::Closed.into());
        }
        if state.fail_write_at == Some(state.writes.len()) {
            return Err(rusb::Error::Pipe.into());
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(TransportError::Closed.into());
        }
        match state.replies.pop_front() {
            Some(mut packet) => {
                if packet.len() > max_len {
                    let rest = packet.split_off(max_len);
                    state.replies.push_front(rest);
                }
                Ok(packet)
            }
            None => Err(rusb::Error::Timeout.into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
        self.state.borrow_mut().timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Timeout {
        self.state.borrow().timeout
    }

    fn reopen_after_reenumeration(&self) -> bool {
        self.reopen
    }
}

/// Hands out queued [`MockTransport`]s, optionally pretending the device is absent at first.
///
/// [`MockTransport`]: struct.MockTransport.html
#[derive(Default)]
pub struct MockOpener {
    transports: RefCell<VecDeque<MockTransport>>,
    absent_for: Cell<u32>,
    failure: Option<Box<dyn Fn() -> Error>>,
    attempts: Cell<u32>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a transport for the next successful open.
    pub fn with_transport(self, transport: MockTransport) -> Self {
        self.transports.borrow_mut().push_back(transport);
        self
    }

    /// Reports the device as absent for the next `count` attempts.
    pub fn fail_times(self, count: u32) -> Self {
        self.absent_for.set(count);
        self
    }

    /// Makes the failing attempts (see [`fail_times`]) fail with the given error instead of
    /// `DeviceNotFound`.
    ///
    /// [`fail_times`]: #method.fail_times
    pub fn fail_with<F: Fn() -> Error + 'static>(mut self, failure: F) -> Self {
        self.failure = Some(Box::new(failure));
        self
    }

    /// Number of open attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    /// Pretends the device vanishes for the next `count` attempts, e.g. while re-enumerating.
    pub fn vanish_for(&self, count: u32) {
        self.absent_for.set(count);
    }
}

impl TransportOpener for MockOpener {
    fn open(&self) -> Result<Box<dyn BulkTransport>> {
        self.attempts.set(self.attempts.get() + 1);
        if self.absent_for.get() > 0 {
            self.absent_for.set(self.absent_for.get() - 1);
            return Err(match &self.failure {
                Some(failure) => failure(),
                None => Error::DeviceNotFound,
            });
        }
        match self.transports.borrow_mut().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(Error::DeviceNotFound),
        }
    }
}

/// A clock which records requested delays instead of sleeping.
#[derive(Default)]
pub struct ManualClock {
    sleeps: RefCell<Vec<Duration>>,
    hook: RefCell<Option<Box<dyn FnMut(usize)>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    /// Sum of all requested delays.
    pub fn elapsed(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }

    /// Runs `hook` after every sleep with the number of sleeps so far.
    pub fn on_sleep<F: FnMut(usize) + 'static>(&self, hook: F) {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let count = {
            let mut sleeps = self.sleeps.borrow_mut();
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(count);
        }
    }
}
