// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::connector::ConnectionError;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(120);

/// Sleeping longer than this skips stream verification entirely; the server
/// has long since discarded the session.
pub const SLEEP_VERIFICATION_BYPASS: Duration = Duration::from_secs(600);

/// How long we wait for the server to answer a verification `<r/>` or ping
/// after waking up.
pub const VERIFICATION_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Awake,
    Visible,
    Sleeping,
    Hidden,
}

#[derive(Default)]
struct State {
    attempts: u32,
    is_reconnecting: bool,
    ever_connected: bool,
    manual_disconnect: bool,
    pending_attempt: Option<JoinHandle<()>>,
}

/// Decides whether and when to reconnect after an unexpected disconnect.
/// The controller only holds policy state; the session drives the actual
/// connection attempts.
#[derive(Default)]
pub struct ReconnectController {
    state: Mutex<State>,
}

impl ReconnectController {
    /// Delay before attempt `n` (1-based): 1s, 2s, 4s, … capped at 2min.
    pub fn delay_for_attempt(attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        Duration::from_millis(1000u64 << exp).min(MAX_RECONNECT_DELAY)
    }

    /// A fresh `connect()` resets the "ever-connected" latch so that a
    /// subsequent failure counts as an initial-login failure again.
    pub fn will_connect(&self) {
        let mut state = self.state.lock();
        state.ever_connected = false;
        state.manual_disconnect = false;
        state.is_reconnecting = false;
        state.attempts = 0;
        if let Some(handle) = state.pending_attempt.take() {
            handle.abort();
        }
    }

    pub fn did_connect(&self) {
        let mut state = self.state.lock();
        state.ever_connected = true;
        state.is_reconnecting = false;
        state.attempts = 0;
    }

    pub fn will_disconnect_manually(&self) {
        let mut state = self.state.lock();
        state.manual_disconnect = true;
        state.is_reconnecting = false;
        if let Some(handle) = state.pending_attempt.take() {
            handle.abort();
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state.lock().is_reconnecting
    }

    /// Abandons the current reconnect cycle, e.g. when an attempt failed
    /// with a terminal error.
    pub fn stop_reconnecting(&self) {
        let mut state = self.state.lock();
        state.is_reconnecting = false;
        if let Some(handle) = state.pending_attempt.take() {
            handle.abort();
        }
    }

    pub fn ever_connected(&self) -> bool {
        self.state.lock().ever_connected
    }

    /// Whether the given disconnect should trigger a scheduled reconnect.
    /// Manual disconnects, credential failures, resource conflicts and
    /// initial-login failures never do.
    pub fn should_reconnect(&self, error: Option<&ConnectionError>) -> bool {
        let state = self.state.lock();

        if state.manual_disconnect {
            return false;
        }
        if !state.ever_connected && !state.is_reconnecting {
            return false;
        }

        match error {
            Some(ConnectionError::InvalidCredentials) | Some(ConnectionError::Conflict) => false,
            _ => true,
        }
    }

    /// Registers the next attempt. Returns its 1-based number, or None when
    /// the attempts are exhausted.
    pub fn begin_attempt(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if state.attempts >= MAX_RECONNECT_ATTEMPTS {
            state.is_reconnecting = false;
            return None;
        }
        state.attempts += 1;
        state.is_reconnecting = true;
        Some(state.attempts)
    }

    pub fn set_pending_attempt(&self, handle: JoinHandle<()>) {
        let mut state = self.state.lock();
        if let Some(previous) = state.pending_attempt.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the pending delay, if any. Returns true when an attempt was
    /// pending and should now run immediately. Used when the app becomes
    /// visible and OS timers may have been suspended.
    pub fn cancel_pending_delay(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_reconnecting {
            return false;
        }
        if let Some(handle) = state.pending_attempt.take() {
            handle.abort();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        assert_eq!(
            ReconnectController::delay_for_attempt(1),
            Duration::from_secs(1)
        );
        assert_eq!(
            ReconnectController::delay_for_attempt(2),
            Duration::from_secs(2)
        );
        assert_eq!(
            ReconnectController::delay_for_attempt(5),
            Duration::from_secs(16)
        );
        assert_eq!(
            ReconnectController::delay_for_attempt(8),
            Duration::from_secs(120)
        );
        assert_eq!(
            ReconnectController::delay_for_attempt(31),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_reconnect_gating() {
        let controller = ReconnectController::default();

        // Never connected: initial-login failure, no reconnect.
        controller.will_connect();
        assert!(!controller.should_reconnect(None));

        controller.did_connect();
        assert!(controller.should_reconnect(None));
        assert!(!controller.should_reconnect(Some(&ConnectionError::InvalidCredentials)));
        assert!(!controller.should_reconnect(Some(&ConnectionError::Conflict)));
        assert!(controller.should_reconnect(Some(&ConnectionError::Generic {
            msg: "connection reset".to_string()
        })));

        controller.will_disconnect_manually();
        assert!(!controller.should_reconnect(None));
    }

    #[test]
    fn test_attempts_are_bounded() {
        let controller = ReconnectController::default();
        controller.did_connect();

        for n in 1..=MAX_RECONNECT_ATTEMPTS {
            assert_eq!(controller.begin_attempt(), Some(n));
        }
        assert_eq!(controller.begin_attempt(), None);
    }
}
