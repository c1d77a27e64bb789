//! Health check manager: heartbeat sender and staleness detector.
//!
//! After [`HealthCheckManager::start`] a heartbeat goes out immediately and
//! then every interval. If no heartbeat response arrives within three
//! intervals the connection is marked unhealthy; the next response marks it
//! healthy again. Each transition emits exactly one status-changed event.

use chrono::{DateTime, Utc};
use framelink_core::status::MIN_HEALTH_CHECK_INTERVAL_MS;
use framelink_core::{AsyncEventEmitter, AsyncHandler, EmitReport};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, error, info, trace, warn};

/// Event key used on the internal emitter.
pub const STATUS_CHANGED: &str = "statusChanged";

/// Missed intervals tolerated before a connection counts as unhealthy.
pub const STALENESS_MULTIPLIER: u32 = 3;

/// Sends one heartbeat upstream.
pub type HeartbeatSender = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthCheckStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthCheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthCheckStatus::Unknown => "unknown",
            HealthCheckStatus::Healthy => "healthy",
            HealthCheckStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckStatusChanged {
    pub status: HealthCheckStatus,
    pub previous_status: HealthCheckStatus,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_check_counter: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheckOptions {
    /// 0 disables the health check.
    pub interval_ms: u64,
    /// Attached to log lines only.
    pub connection_id: Option<String>,
}

struct State {
    status: HealthCheckStatus,
    last_check_time: Option<DateTime<Utc>>,
    last_check_counter: Option<u64>,
    interval_ms: u64,
    connection_id: Option<String>,
    send_timer: Option<JoinHandle<()>>,
    staleness_timer: Option<JoinHandle<()>>,
}

impl State {
    fn is_running(&self) -> bool {
        self.send_timer.is_some()
    }

    fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.interval_ms) * STALENESS_MULTIPLIER
    }

    fn snapshot(&self, previous_status: HealthCheckStatus) -> HealthCheckStatusChanged {
        HealthCheckStatusChanged {
            status: self.status,
            previous_status,
            last_check_time: self.last_check_time,
            last_check_counter: self.last_check_counter,
        }
    }
}

struct Shared {
    send_heartbeat: HeartbeatSender,
    state: Mutex<State>,
    events: AsyncEventEmitter<HealthCheckStatusChanged>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_staleness(self: &Arc<Self>, window: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep(window).await;
            if let Some(shared) = weak.upgrade() {
                shared.set_unhealthy().await;
            }
        })
    }

    async fn set_unhealthy(&self) -> Option<EmitReport> {
        let event = {
            let mut state = self.lock();
            // A response or restart may have re-armed the window after this
            // timer woke; only the timer currently armed may expire it.
            let current = state.staleness_timer.as_ref().map(JoinHandle::id);
            if current.is_none() || current != task::try_id() {
                trace!("Superseded staleness timer, ignoring");
                return None;
            }
            state.staleness_timer.take();
            if state.status == HealthCheckStatus::Unhealthy {
                return None;
            }
            let previous = state.status;
            state.status = HealthCheckStatus::Unhealthy;
            warn!(
                connection_id = ?state.connection_id,
                last_check_counter = ?state.last_check_counter,
                window_ms = state.staleness_window().as_millis() as u64,
                "Health check response overdue, connection unhealthy"
            );
            state.snapshot(previous)
        };
        Some(self.events.emit(STATUS_CHANGED, event).await)
    }
}

/// Tracks liveness of one connection.
pub struct HealthCheckManager {
    shared: Arc<Shared>,
}

impl HealthCheckManager {
    pub fn new(send_heartbeat: HeartbeatSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                send_heartbeat,
                state: Mutex::new(State {
                    status: HealthCheckStatus::Unknown,
                    last_check_time: None,
                    last_check_counter: None,
                    interval_ms: 0,
                    connection_id: None,
                    send_timer: None,
                    staleness_timer: None,
                }),
                events: AsyncEventEmitter::new(),
            }),
        }
    }

    /// Start heartbeats. Restarts cleanly if already running.
    ///
    /// An interval of 0 disables the check; intervals under one second are
    /// refused. Must be called inside a tokio runtime.
    pub fn start(&self, options: HealthCheckOptions) {
        self.stop();

        {
            let mut state = self.shared.lock();
            state.connection_id = options.connection_id.clone();
            state.interval_ms = 0;
        }

        let interval_ms = options.interval_ms;
        if interval_ms == 0 {
            debug!(connection_id = ?options.connection_id, "Health check disabled");
            return;
        }
        if interval_ms < MIN_HEALTH_CHECK_INTERVAL_MS {
            error!(
                connection_id = ?options.connection_id,
                interval_ms,
                min_interval_ms = MIN_HEALTH_CHECK_INTERVAL_MS,
                "Health check interval too aggressive, not starting"
            );
            return;
        }

        info!(connection_id = ?options.connection_id, interval_ms, "Starting health check");
        (self.shared.send_heartbeat)();

        let period = Duration::from_millis(interval_ms);
        let first_tick = Instant::now() + period;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let send_timer = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                trace!("Sending heartbeat");
                (shared.send_heartbeat)();
            }
        });

        let mut state = self.shared.lock();
        state.interval_ms = interval_ms;
        state.send_timer = Some(send_timer);
        state.staleness_timer = Some(self.shared.arm_staleness(state.staleness_window()));
    }

    /// Cancel both timers. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        let was_running = state.is_running();
        if let Some(timer) = state.send_timer.take() {
            timer.abort();
        }
        if let Some(timer) = state.staleness_timer.take() {
            timer.abort();
        }
        if was_running {
            debug!(connection_id = ?state.connection_id, "Health check stopped");
        }
    }

    /// Record a heartbeat response and restart the staleness window.
    ///
    /// Emits a status-changed event only when the status was not already
    /// healthy. Returns the fan-out report when an event was emitted.
    pub async fn handle_response(&self, time: i64, counter: u64) -> Option<EmitReport> {
        let event = {
            let mut state = self.shared.lock();
            state.last_check_time = DateTime::from_timestamp_millis(time);
            state.last_check_counter = Some(counter);

            if state.is_running() {
                if let Some(timer) = state.staleness_timer.take() {
                    timer.abort();
                }
                state.staleness_timer = Some(self.shared.arm_staleness(state.staleness_window()));
            }

            if state.status == HealthCheckStatus::Healthy {
                trace!(counter, "Health check response");
                None
            } else {
                let previous = state.status;
                state.status = HealthCheckStatus::Healthy;
                info!(
                    connection_id = ?state.connection_id,
                    counter,
                    previous = %previous,
                    "Connection healthy"
                );
                Some(state.snapshot(previous))
            }
        };

        match event {
            Some(event) => Some(self.shared.events.emit(STATUS_CHANGED, event).await),
            None => None,
        }
    }

    pub fn on_status_change(&self, handler: AsyncHandler<HealthCheckStatusChanged>) {
        self.shared.events.on(STATUS_CHANGED, handler);
    }

    pub fn off_status_change(&self, handler: &AsyncHandler<HealthCheckStatusChanged>) -> bool {
        self.shared.events.off(STATUS_CHANGED, handler)
    }

    pub fn status(&self) -> HealthCheckStatus {
        self.shared.lock().status
    }

    pub fn last_check_time(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_check_time
    }

    pub fn last_check_counter(&self) -> Option<u64> {
        self.shared.lock().last_check_counter
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().is_running()
    }
}

impl Drop for HealthCheckManager {
    fn drop(&mut self) {
        self.stop();
    }
}
