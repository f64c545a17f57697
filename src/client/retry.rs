use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::warn;

use super::ClientInner;
use crate::utils::backoff::Backoff;
use crate::Connection;
use crate::Error;
use crate::Result;
use crate::SessionState;

impl ClientInner {
    /// Single attempt against the current session.
    ///
    /// Fails with `InvalidSession` when the client is closing or the
    /// connection handle is gone.
    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&dyn Connection) -> Result<T>,
    ) -> Result<T> {
        if !self.lifecycle.is_open() {
            return Err(Error::InvalidSession("client is closed".to_string()));
        }
        let handle = self.session.load_full().ok_or_else(|| {
            Error::InvalidSession(
                "connection handle is absent, close this client and create a new one".to_string(),
            )
        })?;
        op(handle.connection.as_ref())
    }

    /// Re-issues `op` while it fails with a retryable error, until the
    /// retry policy or the operation deadline runs out.
    ///
    /// Session validity is checked before every attempt, so a session that
    /// degrades mid-loop ends it with `InvalidSession`. A timeout too large
    /// to represent leaves only `max_retries` as the bound.
    pub(crate) fn retry_until_connected<T>(
        &self,
        mut op: impl FnMut(&dyn Connection) -> Result<T>,
    ) -> Result<T> {
        let deadline = Instant::now().checked_add(self.config.operation_timeout());
        let mut backoff = Backoff::new(self.config.retry);

        loop {
            let err = match self.with_connection(&mut op) {
                Err(e) if e.is_retryable() => e,
                other => return other,
            };

            let now = Instant::now();
            let delay = match (backoff.next_delay(), deadline) {
                (Some(delay), None) => delay,
                (Some(delay), Some(deadline)) if now < deadline => delay.min(deadline - now),
                _ => {
                    warn!(
                        attempts = backoff.attempts() + 1,
                        "giving up on store operation: {}", err
                    );
                    return Err(Error::TransientConnectionLoss(format!(
                        "gave up after {} attempts: {}",
                        backoff.attempts() + 1,
                        err
                    )));
                }
            };
            debug!("store operation failed ({}), retrying in {:?}", err, delay);
            self.wait_for_state_change(delay);
        }
    }

    /// Sleeps up to `timeout`, waking early on any session state change.
    fn wait_for_state_change(
        &self,
        timeout: Duration,
    ) {
        let mut state = self.state.lock();
        if self.lifecycle.is_open() {
            let _ = self.state_changed.wait_for(&mut state, timeout);
        }
    }

    pub(crate) fn wait_until_connected(
        &self,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while *state != SessionState::Connected {
            if !self.lifecycle.is_open() {
                return Err(Error::InvalidSession("client is closed".to_string()));
            }
            let timed_out = match deadline {
                Some(deadline) => self.state_changed.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.state_changed.wait(&mut state);
                    false
                }
            };
            if timed_out && *state != SessionState::Connected {
                return Err(Error::TransientConnectionLoss(format!(
                    "not connected within {:?}",
                    timeout
                )));
            }
        }
        Ok(())
    }
}
