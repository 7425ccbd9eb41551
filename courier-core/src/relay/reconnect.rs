// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reconnection backoff.

use std::time::Duration;

/// Exponential backoff for relay reconnects.
///
/// The delay doubles with every attempt (the exponent stops growing after
/// six attempts) and never exceeds the configured maximum.
#[derive(Debug, Clone)]
pub struct ReconnectionTimer {
    base_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ReconnectionTimer {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        ReconnectionTimer {
            base_delay,
            max_delay,
            attempt: 0,
        }
    }

    /// Returns the delay for the next attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay * (1u32 << self.attempt.min(6));
        self.attempt = self.attempt.saturating_add(1);
        delay.min(self.max_delay)
    }

    /// Sleeps for the next backoff delay.
    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        tracing::debug!(attempt = self.attempt, ?delay, "Waiting before reconnect");
        tokio::time::sleep(delay).await;
    }

    /// Call after a successful authentication.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
