//! Polling for a device which only enumerates transiently.
//!
//! The OMAP ROM only shows up on the bus for a short while after reset, and neither libusb nor
//! ugen(4) can deliver a notification when a particular device appears. Presence is therefore
//! detected by simply trying to open the device until it works.

use crate::cancel::CancelToken;
use crate::context::TransportOpener;
use crate::error::{Error, ErrorKind, Result};
use crate::transport::BulkTransport;
use crate::POLL_INTERVAL;
use log::{debug, trace};
use std::thread;
use std::time::Duration;

/// Source of delays, so waiting can be faked in tests.
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// How often and how many times to try opening a device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Delay between two attempts.
    pub interval: Duration,

    /// Total number of attempts, `None` for trying forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// A single attempt, failing right away if the device is absent.
    pub const ONCE: RetryPolicy = RetryPolicy {
        interval: Duration::from_millis(0),
        max_attempts: Some(1),
    };

    /// Keep trying at the given interval until the device shows up.
    pub fn indefinite(interval: Duration) -> Self {
        RetryPolicy {
            interval,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` tries.
    pub fn bounded(interval: Duration, attempts: u32) -> Self {
        RetryPolicy {
            interval,
            max_attempts: Some(attempts),
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::indefinite(POLL_INTERVAL)
    }
}

/// Finds and opens a transport to the target, waiting for it to appear if asked to.
pub struct DeviceLocator<O: TransportOpener, C: Clock = SystemClock> {
    opener: O,
    clock: C,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl<O: TransportOpener> DeviceLocator<O, SystemClock> {
    pub fn new(opener: O) -> Self {
        Self::with_clock(opener, SystemClock)
    }
}

impl<O: TransportOpener, C: Clock> DeviceLocator<O, C> {
    pub fn with_clock(opener: O, clock: C) -> Self {
        DeviceLocator {
            opener,
            clock,
            policy: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Sets the policy used by blocking [`locate`] calls.
    ///
    /// [`locate`]: #method.locate
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Makes polling loops abort when `cancel` is triggered.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Opens the target. If `blocking`, polls according to the configured policy; otherwise makes
    /// exactly one attempt.
    pub fn locate(&self, blocking: bool) -> Result<Box<dyn BulkTransport>> {
        if blocking {
            self.locate_with(self.policy)
        } else {
            self.locate_with(RetryPolicy::ONCE)
        }
    }

    /// Opens the target, polling according to `policy`.
    ///
    /// A device which is present but cannot be opened yet (e.g. while udev is still adjusting its
    /// permissions) is treated like an absent one. Configuration errors and cancellation are
    /// returned immediately.
    pub fn locate_with(&self, policy: RetryPolicy) -> Result<Box<dyn BulkTransport>> {
        let mut attempts = 0;
        loop {
            self.cancel.check()?;
            attempts += 1;
            match self.opener.open() {
                Ok(transport) => {
                    debug!("Device found after {} attempt(s)", attempts);
                    return Ok(transport);
                }
                Err(err) if is_retryable(&err) => {
                    if policy.exhausted(attempts) {
                        debug!(
                            "Device not found after {} attempt(s), last error: {}",
                            attempts, err
                        );
                        return Err(Error::DeviceNotFound);
                    }
                    trace!("Could not open device ({}), retrying", err);
                }
                Err(err) => return Err(err),
            }
            self.clock.sleep(policy.interval);
        }
    }
}

/// Failures to open which may go away by themselves.
fn is_retryable(err: &Error) -> bool {
    match err.kind() {
        ErrorKind::DeviceNotFound | ErrorKind::Transport | ErrorKind::Io => true,
        ErrorKind::Configuration
        | ErrorKind::Framing
        | ErrorKind::ProtocolViolation
        | ErrorKind::Cancelled => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ManualClock, MockOpener, MockTransport};

    #[test]
    fn non_blocking_makes_one_attempt() {
        let opener = MockOpener::new().fail_times(3);
        let clock = ManualClock::new();
        let locator = DeviceLocator::with_clock(&opener, &clock);

        assert!(matches!(locator.locate(false), Err(Error::DeviceNotFound)));
        assert_eq!(opener.attempts(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn blocking_polls_until_present() {
        let opener = MockOpener::new()
            .fail_times(3)
            .with_transport(MockTransport::new());
        let clock = ManualClock::new();
        let locator = DeviceLocator::with_clock(&opener, &clock)
            .with_policy(RetryPolicy::indefinite(Duration::from_millis(100)));

        assert!(locator.locate(true).is_ok());
        assert_eq!(opener.attempts(), 4);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100); 3]);
    }

    #[test]
    fn bounded_policy_gives_up() {
        let opener = MockOpener::new().fail_times(10);
        let clock = ManualClock::new();
        let locator = DeviceLocator::with_clock(&opener, &clock)
            .with_policy(RetryPolicy::bounded(Duration::from_millis(50), 5));

        assert!(matches!(locator.locate(true), Err(Error::DeviceNotFound)));
        assert_eq!(opener.attempts(), 5);
        assert_eq!(clock.sleeps().len(), 4);
    }

    #[test]
    fn open_failures_are_retried() {
        let opener = MockOpener::new()
            .fail_times(2)
            .fail_with(|| rusb::Error::Access.into())
            .with_transport(MockTransport::new());
        let clock = ManualClock::new();
        let locator = DeviceLocator::with_clock(&opener, &clock);

        assert!(locator.locate(true).is_ok());
        assert_eq!(opener.attempts(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn exhausted_open_failures_report_device_not_found() {
        let opener = MockOpener::new()
            .fail_times(5)
            .fail_with(|| rusb::Error::Busy.into());
        let clock = ManualClock::new();
        let locator = DeviceLocator::with_clock(&opener, &clock)
            .with_policy(RetryPolicy::bounded(Duration::from_millis(100), 3));

        assert!(matches!(locator.locate(true), Err(Error::DeviceNotFound)));
        assert_eq!(opener.attempts(), 3);
    }

    #[test]
    fn configuration_errors_are_not_retried() {
        let opener = MockOpener::new()
            .fail_times(1)
            .fail_with(|| Error::Configuration("bad endpoint".into()))
            .with_transport(MockTransport::new());
        let clock = ManualClock::new();
        let locator = DeviceLocator::with_clock(&opener, &clock);

        assert_eq!(
            locator.locate(true).err().map(|e| e.kind()),
            Some(ErrorKind::Configuration)
        );
        assert_eq!(opener.attempts(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn cancellation_stops_polling() {
        let opener = MockOpener::new().fail_times(u32::MAX);
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        clock.on_sleep(move |count| {
            if count == 2 {
                trigger.cancel();
            }
        });
        let locator = DeviceLocator::with_clock(&opener, &clock).with_cancel_token(cancel);

        assert!(matches!(locator.locate(true), Err(Error::Cancelled)));
        assert_eq!(opener.attempts(), 2);
    }
}
