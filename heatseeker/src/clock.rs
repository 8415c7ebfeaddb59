// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Monotonic time, in milliseconds.

/// Monotonic millisecond clock.
///
/// Any `Fn() -> u64` is a clock, which keeps hardware timers and test doubles equally cheap to
/// plug in.
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Milliseconds elapsed since `epoch`, saturating at 0.
    fn ms_since(&self, epoch: u64) -> u64 {
        self.now_ms().saturating_sub(epoch)
    }
}

impl<F> Clock for F
where
    F: Fn() -> u64,
{
    fn now_ms(&self) -> u64 {
        self()
    }
}

/// A clock backed by [`std::time::Instant`], counting from its creation.
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}
