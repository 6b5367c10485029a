use crate::error::{Error, Result};
use crate::locator::RetryPolicy;
use crate::transport::Timeout;
use crate::{ID_READ_LENGTH, POLL_INTERVAL, SETTLE_DELAY, UPLOAD_CHUNK_SIZE};
use std::time::Duration;

/// Whether the transport is replaced after the second stage has been uploaded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconnectMode {
    /// Ask the transport backend.
    Auto,

    /// Keep talking through the handle used for the ROM.
    Reuse,

    /// Close the handle and open a fresh one.
    Reopen,
}

impl Default for ReconnectMode {
    fn default() -> Self {
        ReconnectMode::Auto
    }
}

/// Tunables of a boot session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootConfig {
    /// Time the second stage needs to come up before it can be talked to. Reopening too quickly
    /// makes it crash, and how quick is too quick varies a little between boots.
    pub settle_delay: Duration,

    /// Polling used when reopening the transport after the second stage upload.
    pub reconnect_policy: RetryPolicy,

    /// See [`ReconnectMode`](enum.ReconnectMode.html).
    pub reconnect: ReconnectMode,

    /// Timeout applied to every transport the session uses.
    pub timeout: Timeout,

    /// Buffer size for reading the ASIC ID.
    pub id_read_length: usize,

    /// Size of the chunks images are written in.
    pub upload_chunk_size: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            settle_delay: SETTLE_DELAY,
            reconnect_policy: RetryPolicy::bounded(POLL_INTERVAL, 100),
            reconnect: ReconnectMode::Auto,
            timeout: Timeout::INDEFINITE,
            id_read_length: ID_READ_LENGTH,
            upload_chunk_size: UPLOAD_CHUNK_SIZE,
        }
    }
}

impl BootConfig {
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn with_reconnect(mut self, mode: ReconnectMode) -> Self {
        self.reconnect = mode;
        self
    }

    /// Sets the transfer timeout in milliseconds. `None` and `Some(0)` both wait indefinitely.
    pub fn with_timeout_millis(mut self, millis: Option<u32>) -> Self {
        self.timeout = Timeout::from_millis(millis);
        self
    }

    pub fn with_id_read_length(mut self, length: usize) -> Self {
        self.id_read_length = length;
        self
    }

    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size;
        self
    }

    /// Checks that all values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.id_read_length == 0 {
            return Err(Error::Configuration(
                "ASIC ID read length must not be zero".into(),
            ));
        }
        if self.upload_chunk_size == 0 {
            return Err(Error::Configuration(
                "upload chunk size must not be zero".into(),
            ));
        }
        if self.reconnect_policy.max_attempts == Some(0) {
            return Err(Error::Configuration(
                "reconnecting needs at least one attempt".into(),
            ));
        }
        Ok(())
    }

    /// Decides whether to reopen, given what the current transport reports.
    pub(crate) fn reopen(&self, backend_requires_reopen: bool) -> bool {
        match self.reconnect {
            ReconnectMode::Auto => backend_requires_reopen,
            ReconnectMode::Reuse => false,
            ReconnectMode::Reopen => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_are_valid() {
        let config = BootConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settle_delay, Duration::from_secs(3));
        assert_eq!(config.timeout, Timeout::INDEFINITE);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = BootConfig::default().with_upload_chunk_size(0);
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
        let config = BootConfig::default().with_id_read_length(0);
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn zero_timeout_is_indefinite() {
        let config = BootConfig::default().with_timeout_millis(Some(0));
        assert_eq!(config.timeout, Timeout::INDEFINITE);
    }

    #[test]
    fn reconnect_mode_overrides_backend() {
        let auto = BootConfig::default();
        assert!(auto.reopen(true));
        assert!(!auto.reopen(false));
        assert!(!auto.clone().with_reconnect(ReconnectMode::Reuse).reopen(true));
        assert!(auto.with_reconnect(ReconnectMode::Reopen).reopen(false));
    }
}
