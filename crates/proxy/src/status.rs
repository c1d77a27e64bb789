//! Connection status manager.
//!
//! Tracks transport readiness and broadcasts every transition to the
//! registered handlers, synchronously and with per-handler isolation.

use framelink_core::{ConnectionStatus, ConnectionStatusChange, EmitReport, Emitter, Handler};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

pub type ConnectionStatusHandler = Handler<ConnectionStatusChange>;

pub struct ConnectionStatusManager {
    current: Mutex<ConnectionStatusChange>,
    emitter: Emitter<ConnectionStatusChange>,
}

impl Default for ConnectionStatusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatusManager {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ConnectionStatusChange::NotConnected),
            emitter: Emitter::new("connectionStatusChange"),
        }
    }

    /// Record `change` and notify every handler.
    ///
    /// `error` and `reset` are accepted from any state.
    pub fn update(&self, change: ConnectionStatusChange) -> EmitReport {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, change.clone()).status()
        };
        self.announce(previous, &change)
    }

    /// Apply `change` only if the current status is still `expected`.
    ///
    /// Returns `None` when another transition got there first.
    pub fn update_from(
        &self,
        expected: ConnectionStatus,
        change: ConnectionStatusChange,
    ) -> Option<EmitReport> {
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.status() != expected {
                trace!(
                    expected = %expected,
                    actual = %current.status(),
                    skipped = %change.status(),
                    "Status transition skipped"
                );
                return None;
            }
            *current = change.clone();
        }
        Some(self.announce(expected, &change))
    }

    fn announce(&self, previous: ConnectionStatus, change: &ConnectionStatusChange) -> EmitReport {
        debug!(from = %previous, to = %change.status(), "Connection status changed");
        trace!(change = ?change, "Connection status details");
        self.emitter.emit(change)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.current().status()
    }

    /// The latest transition, including its connection id or error reason.
    pub fn current(&self) -> ConnectionStatusChange {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == ConnectionStatus::Ready
    }

    pub fn on_change(&self, handler: ConnectionStatusHandler) {
        self.emitter.on(handler);
    }

    pub fn off_change(&self, handler: &ConnectionStatusHandler) -> bool {
        self.emitter.off(handler)
    }
}
