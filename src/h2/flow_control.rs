//! HTTP/2 flow control (RFC 9113 §5.2, §6.9).
//!
//! [`FlowController`] tracks what we may still send to the peer.
//! [`IncomingFlowController`] tracks what the peer may still send to us and
//! batches the WINDOW_UPDATE frames that hand credit back.
//!
//! Balances are signed: a SETTINGS_INITIAL_WINDOW_SIZE shrink can drive a
//! window below zero, and no withdrawal succeeds until WINDOW_UPDATEs cover
//! the deficit.

use crate::error::{ErrorCode, H2Error};

use super::settings::MAX_WINDOW_SIZE;

/// Default initial window size (RFC 9113 §6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65535;

/// Default connection-level flow control window (same as stream).
pub const DEFAULT_CONNECTION_WINDOW_SIZE: i32 = 65535;

/// A window that DATA bytes can be withdrawn from.
pub trait Credit {
    /// Current balance. May be negative.
    fn credit(&self) -> i32;

    /// Withdraw `n` bytes if the balance covers them. Never partial.
    fn withdraw_if_can(&mut self, n: u32) -> bool;
}

/// Withdraw `n` from both windows, or from neither.
pub fn withdraw_both<A: Credit, B: Credit>(conn: &mut A, stream: &mut B, n: u32) -> bool {
    let n_wide = i64::from(n);
    if n_wide > i64::from(conn.credit()) || n_wide > i64::from(stream.credit()) {
        return false;
    }
    conn.withdraw_if_can(n) && stream.withdraw_if_can(n)
}

fn checked_add(stream_id: u32, window: i32, n: i64) -> Result<i32, H2Error> {
    let new_window = i64::from(window) + n;
    if new_window > i64::from(MAX_WINDOW_SIZE) {
        return Err(overflow(stream_id));
    }
    Ok(new_window as i32)
}

fn overflow(stream_id: u32) -> H2Error {
    if stream_id == 0 {
        H2Error::flow_control("Credit overflow")
    } else {
        H2Error::stream(stream_id, ErrorCode::FlowControlError, "Credit overflow")
    }
}

fn withdraw(window: &mut i32, n: u32) -> bool {
    debug_assert!(n <= MAX_WINDOW_SIZE, "withdrawal larger than any window");
    if n == 0 {
        return true;
    }
    if i64::from(n) > i64::from(*window) {
        return false;
    }
    *window -= n as i32;
    true
}

/// Outgoing window: credit the peer granted us.
#[derive(Debug, Clone)]
pub struct FlowController {
    /// 0 for the connection window.
    stream_id: u32,
    /// Current window size (can go negative for shrinking via SETTINGS).
    window: i32,
}

impl FlowController {
    pub fn new(stream_id: u32, initial_window: u32) -> Self {
        Self {
            stream_id,
            window: initial_window.min(MAX_WINDOW_SIZE) as i32,
        }
    }

    /// Current available window.
    pub fn window(&self) -> i32 {
        self.window
    }

    /// Bytes that can be sent right now.
    pub fn available(&self) -> u32 {
        self.window.max(0) as u32
    }

    /// Add a received WINDOW_UPDATE increment.
    ///
    /// Overflow is FLOW_CONTROL_ERROR: connection scope for the connection
    /// window, stream scope otherwise.
    pub fn apply_window_update(&mut self, increment: u32) -> Result<(), H2Error> {
        self.window = checked_add(self.stream_id, self.window, i64::from(increment))?;
        Ok(())
    }

    /// Shift the window by `new - old` after the peer changes
    /// SETTINGS_INITIAL_WINDOW_SIZE. Overflow is a connection error.
    pub fn apply_settings_change(&mut self, old: u32, new: u32) -> Result<(), H2Error> {
        let delta = i64::from(new) - i64::from(old);
        self.window = checked_add(0, self.window, delta)?;
        Ok(())
    }
}

impl Credit for FlowController {
    fn credit(&self) -> i32 {
        self.window
    }

    fn withdraw_if_can(&mut self, n: u32) -> bool {
        withdraw(&mut self.window, n)
    }
}

/// Incoming window: credit we granted the peer.
#[derive(Debug, Clone)]
pub struct IncomingFlowController {
    stream_id: u32,
    /// Bytes the peer may still send.
    window: i32,
    /// Largest window we advertise.
    max_credit: i32,
    /// Credit restored locally but not yet announced with WINDOW_UPDATE.
    pending: u32,
}

impl IncomingFlowController {
    pub fn new(stream_id: u32, initial_window: u32) -> Self {
        let initial = initial_window.min(MAX_WINDOW_SIZE) as i32;
        Self {
            stream_id,
            window: initial,
            max_credit: initial,
            pending: 0,
        }
    }

    pub fn window(&self) -> i32 {
        self.window
    }

    pub fn max_credit(&self) -> i32 {
        self.max_credit
    }

    /// Return `n` consumed bytes to the peer.
    ///
    /// Returns `Some(amount)` once the unannounced credit reaches half of
    /// the maximum window; the caller sends a WINDOW_UPDATE for `amount`.
    pub fn increment_credit(&mut self, n: u32) -> Result<Option<u32>, H2Error> {
        if n == 0 {
            return Ok(None);
        }
        self.window = checked_add(self.stream_id, self.window, i64::from(n))?;
        self.pending = self.pending.saturating_add(n);
        if self.pending >= (self.max_credit as u32) >> 1 {
            let commit = self.pending;
            self.pending = 0;
            return Ok(Some(commit));
        }
        Ok(None)
    }

    /// Apply a change to our own SETTINGS_INITIAL_WINDOW_SIZE once the peer
    /// has acknowledged it.
    pub fn apply_settings_change(&mut self, old: u32, new: u32) -> Result<(), H2Error> {
        let delta = i64::from(new) - i64::from(old);
        self.window = checked_add(0, self.window, delta)?;
        self.max_credit = new.min(MAX_WINDOW_SIZE) as i32;
        Ok(())
    }

    /// Raise the advertised maximum, returning the WINDOW_UPDATE increment
    /// that announces it. Used for the connection window, which SETTINGS
    /// cannot change.
    pub fn grow_to(&mut self, target: u32) -> Option<u32> {
        let target = target.min(MAX_WINDOW_SIZE) as i32;
        if target <= self.max_credit {
            return None;
        }
        let diff = target - self.max_credit;
        self.window += diff;
        self.max_credit = target;
        Some(diff as u32)
    }
}

impl Credit for IncomingFlowController {
    fn credit(&self) -> i32 {
        self.window
    }

    fn withdraw_if_can(&mut self, n: u32) -> bool {
        withdraw(&mut self.window, n)
    }
}
