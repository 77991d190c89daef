//! Connection lifecycle.
//!
//! The push channel moves through `Disconnected → Connecting → Connected`.
//! Every transition into `Connected` after an earlier connected session is a
//! reconnect and starts a new epoch; events stamped with an older epoch are
//! discarded by the engine.

use crate::config::ReconnectConfig;
use crate::error::RealtimeResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use stratus_protocol::RawMessage;
use tokio::sync::mpsc;

/// State of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel.
    Disconnected,
    /// Opening a channel.
    Connecting,
    /// Channel open.
    Connected,
}

/// Opens the push channel.
///
/// Each successful call starts one session. Frames arrive on the returned
/// receiver; the session ends when the sender side is dropped.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Opens a new session.
    async fn connect(&self) -> RealtimeResult<mpsc::Receiver<RawMessage>>;
}

/// A connected channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Epoch stamped on every frame received in this session.
    pub epoch: u32,
    /// Whether an earlier session existed.
    pub reconnect: bool,
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    ever_connected: bool,
    epoch: u32,
}

/// Tracks the push channel state, epoch and backoff.
#[derive(Debug)]
pub struct ConnectionManager {
    lifecycle: RwLock<Lifecycle>,
    failures: AtomicU32,
    backoff: ReconnectConfig,
}

impl ConnectionManager {
    /// Creates a disconnected manager in epoch 0.
    pub fn new(backoff: ReconnectConfig) -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle {
                state: ConnectionState::Disconnected,
                ever_connected: false,
                epoch: 0,
            }),
            failures: AtomicU32::new(0),
            backoff,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.read().state
    }

    /// Current epoch.
    pub fn epoch(&self) -> u32 {
        self.lifecycle.read().epoch
    }

    /// Consecutive failed connection attempts.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Records that a connection attempt started.
    pub fn on_connecting(&self) {
        self.lifecycle.write().state = ConnectionState::Connecting;
    }

    /// Records that a session opened.
    pub fn on_connected(&self) -> Session {
        let mut lifecycle = self.lifecycle.write();
        let reconnect = lifecycle.ever_connected;
        if reconnect {
            lifecycle.epoch = lifecycle.epoch.wrapping_add(1);
        }
        lifecycle.ever_connected = true;
        lifecycle.state = ConnectionState::Connected;
        self.failures.store(0, Ordering::SeqCst);

        Session {
            epoch: lifecycle.epoch,
            reconnect,
        }
    }

    /// Records that the session closed. Returns true if one was open.
    pub fn on_disconnected(&self) -> bool {
        let mut lifecycle = self.lifecycle.write();
        let was_connected = lifecycle.state == ConnectionState::Connected;
        lifecycle.state = ConnectionState::Disconnected;
        was_connected
    }

    /// Records a failed attempt. Returns the number of consecutive failures.
    pub fn on_connect_failed(&self) -> u32 {
        self.lifecycle.write().state = ConnectionState::Disconnected;
        self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Delay before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay_for_attempt(self.failures())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connect_keeps_epoch() {
        let manager = ConnectionManager::default();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.on_connecting();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let session = manager.on_connected();
        assert_eq!(session, Session { epoch: 0, reconnect: false });
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn reconnect_increments_epoch() {
        let manager = ConnectionManager::default();
        manager.on_connected();
        assert!(manager.on_disconnected());
        assert!(!manager.on_disconnected());

        let session = manager.on_connected();
        assert_eq!(session, Session { epoch: 1, reconnect: true });
        manager.on_disconnected();
        assert_eq!(manager.on_connected().epoch, 2);
    }

    #[test]
    fn failures_before_first_connect_are_not_reconnects() {
        let manager = ConnectionManager::new(ReconnectConfig::immediate());
        assert_eq!(manager.on_connect_failed(), 1);
        assert_eq!(manager.on_connect_failed(), 2);
        assert_eq!(manager.failures(), 2);

        let session = manager.on_connected();
        assert!(!session.reconnect);
        assert_eq!(manager.failures(), 0);
    }

    #[test]
    fn backoff_follows_failures() {
        let backoff = ReconnectConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(false);
        let manager = ConnectionManager::new(backoff);
        assert_eq!(manager.next_delay(), Duration::ZERO);

        manager.on_connect_failed();
        assert_eq!(manager.next_delay(), Duration::from_millis(100));
        manager.on_connect_failed();
        assert_eq!(manager.next_delay(), Duration::from_millis(200));

        manager.on_connected();
        assert_eq!(manager.next_delay(), Duration::ZERO);
    }
}
