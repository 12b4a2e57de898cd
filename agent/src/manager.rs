//! Connection manager
//!
//! Keeps exactly one relay connection alive forever:
//!
//! ```text
//! Disconnected → Dialing → Connected → Disconnected → …
//!                   │
//!                   └─ dial failed: wait, back to Disconnected
//! ```
//!
//! Dialing and serving are behind the [`Tunnel`] trait, and every delay
//! goes through tokio's clock, so the failure paths can be driven
//! without a network or real timers.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait after a failed dial
pub const DIAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Wait after a session ends
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// While the relay stays unreachable, every Nth consecutive dial failure
/// is logged at WARN; the rest go to DEBUG.
pub const DIAL_WARN_EVERY: u64 = 30;

/// Fixed retry delays. No backoff growth, no retry limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub dial_retry: Duration,
    pub reconnect: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            dial_retry: DIAL_RETRY_DELAY,
            reconnect: RECONNECT_DELAY,
        }
    }
}

/// Something the manager can dial and then serve until it ends.
pub trait Tunnel {
    type Conn;

    /// Open a new connection to the relay.
    fn dial(&mut self) -> impl Future<Output = Result<Self::Conn>>;

    /// Run one session on `conn` to completion and close it.
    fn serve(&mut self, conn: Self::Conn) -> impl Future<Output = Result<()>>;

    /// Where operators can reach the tunnelled service.
    fn access_url(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Dialing,
    Connected,
}

enum Phase<C> {
    Disconnected,
    Dialing,
    Connected(C),
}

pub struct ConnectionManager<T: Tunnel> {
    tunnel: T,
    policy: RetryPolicy,
    phase: Phase<T::Conn>,
    failed_dials: u64,
    dial_streak: u64,
    sessions: u64,
}

impl<T: Tunnel> ConnectionManager<T> {
    pub fn new(tunnel: T, policy: RetryPolicy) -> Self {
        Self {
            tunnel,
            policy,
            phase: Phase::Disconnected,
            failed_dials: 0,
            dial_streak: 0,
            sessions: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        match self.phase {
            Phase::Disconnected => ConnState::Disconnected,
            Phase::Dialing => ConnState::Dialing,
            Phase::Connected(_) => ConnState::Connected,
        }
    }

    /// Dial failures since start
    pub fn failed_dials(&self) -> u64 {
        self.failed_dials
    }

    /// Dial failures since the last successful dial
    pub fn dial_streak(&self) -> u64 {
        self.dial_streak
    }

    /// Sessions served to completion since start
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Loop forever. Only external cancellation stops this.
    pub async fn run(&mut self) {
        loop {
            self.step().await;
        }
    }

    /// Perform exactly one state transition, including any delay that
    /// belongs to it.
    pub async fn step(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::Disconnected);
        self.phase = match phase {
            Phase::Disconnected => Phase::Dialing,
            Phase::Dialing => match self.tunnel.dial().await {
                Ok(conn) => {
                    self.dial_streak = 0;
                    info!(
                        "Connected to relay; use [{}] to access the target service",
                        self.tunnel.access_url()
                    );
                    Phase::Connected(conn)
                }
                Err(e) => {
                    self.failed_dials += 1;
                    self.dial_streak += 1;
                    let error = format!("{:#}", e);
                    if warn_on_dial_failure(self.dial_streak) {
                        warn!(
                            %error,
                            attempt = self.dial_streak,
                            "Relay unreachable, retrying every {:?}",
                            self.policy.dial_retry
                        );
                    } else {
                        debug!(
                            %error,
                            attempt = self.dial_streak,
                            "Dial failed, retrying in {:?}",
                            self.policy.dial_retry
                        );
                    }
                    tokio::time::sleep(self.policy.dial_retry).await;
                    Phase::Disconnected
                }
            },
            Phase::Connected(conn) => {
                match self.tunnel.serve(conn).await {
                    Ok(()) => info!("Session ended, reconnecting in {:?}", self.policy.reconnect),
                    Err(e) => warn!(
                        error = %format!("{:#}", e),
                        "Session ended, reconnecting in {:?}",
                        self.policy.reconnect
                    ),
                }
                self.sessions += 1;
                tokio::time::sleep(self.policy.reconnect).await;
                Phase::Disconnected
            }
        };
    }
}

fn warn_on_dial_failure(streak: u64) -> bool {
    streak == 1 || streak % DIAL_WARN_EVERY == 0
}
