//! Reconnection state machine.
//!
//! Pure bookkeeping with no I/O: the channel driver feeds it transport
//! events and acts on what it returns. All retry scheduling goes through
//! [`ConnectionMachine::on_close`].

use std::time::Duration;

/// 接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connecting, or waiting for a scheduled reconnect
    Connecting,
    Open,
    /// Retries used up; waits for the owner to reconnect or tear down
    Exhausted,
    /// Torn down by the owner. Final.
    Closed,
}

/// What the driver has to do after the transport closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Connect again after `delay`
    Reconnect { attempt: u32, delay: Duration },
    /// Stop retrying and tell the owner
    Exhausted { attempts: u32 },
    /// Closed already, or a reconnect is pending
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    backoff: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
    reconnect_pending: bool,
}

impl ConnectionMachine {
    /// Starts in `Connecting`, with the first attempt under way.
    pub fn new(initial_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        let initial_backoff = initial_backoff.min(max_backoff);
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            backoff: initial_backoff,
            initial_backoff,
            max_backoff,
            max_attempts,
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next scheduled reconnect will wait
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_pending
    }

    /// Transport opened. Resets the retry schedule.
    /// Returns false if the machine is already closed.
    pub fn on_open(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.backoff = self.initial_backoff;
        self.reconnect_pending = false;
        true
    }

    /// Transport closed, or a connect attempt failed.
    pub fn on_close(&mut self) -> CloseOutcome {
        match self.state {
            ConnectionState::Closed | ConnectionState::Exhausted => return CloseOutcome::Ignored,
            _ if self.reconnect_pending => return CloseOutcome::Ignored,
            _ => {}
        }

        if self.attempt >= self.max_attempts {
            self.state = ConnectionState::Exhausted;
            return CloseOutcome::Exhausted {
                attempts: self.attempt,
            };
        }

        self.attempt += 1;
        let delay = self.backoff;
        self.backoff = self.backoff.saturating_mul(2).min(self.max_backoff);
        self.reconnect_pending = true;
        self.state = ConnectionState::Connecting;
        CloseOutcome::Reconnect {
            attempt: self.attempt,
            delay,
        }
    }

    /// The backoff timer fired. Returns whether a connect attempt should start.
    pub fn on_reconnect_due(&mut self) -> bool {
        let due = self.reconnect_pending && self.state == ConnectionState::Connecting;
        self.reconnect_pending = false;
        due
    }

    /// Owner asked to start over after exhaustion.
    pub fn reconnect(&mut self) -> bool {
        if self.state != ConnectionState::Exhausted {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.attempt = 0;
        self.backoff = self.initial_backoff;
        self.reconnect_pending = false;
        true
    }

    /// Owner teardown. Returns false if already closed.
    pub fn teardown(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        self.reconnect_pending = false;
        true
    }
}
