// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Stand-ins for the hardware around the sensor. Clones share state, so a test can keep a
//! handle to inspect what the code under test did with its copy.
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use crate::sensor_bus::MockError;

/// A millisecond clock that only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

/// Remembers every duty cycle it was given.
#[derive(Clone, Debug, Default)]
pub struct RecordingMotor {
    duties: Rc<RefCell<Vec<f32>>>,
    failures: Rc<Cell<usize>>,
}

impl RecordingMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, duty: f32) -> Result<(), MockError> {
        if take_failure(&self.failures) {
            return Err(MockError::Injected);
        }
        self.duties.borrow_mut().push(duty);
        Ok(())
    }

    pub fn history(&self) -> Vec<f32> {
        self.duties.borrow().clone()
    }

    pub fn last(&self) -> Option<f32> {
        self.duties.borrow().last().copied()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.set(count);
    }
}

/// A 16-bit hardware counter that a test moves by hand.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEncoder {
    count: Rc<Cell<u16>>,
    failures: Rc<Cell<usize>>,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Result<u16, MockError> {
        if take_failure(&self.failures) {
            return Err(MockError::Injected);
        }
        Ok(self.count.get())
    }

    pub fn set_count(&self, count: u16) {
        self.count.set(count);
    }

    /// Move by `delta` ticks, wrapping like the hardware does.
    pub fn step(&self, delta: i32) {
        self.count.set(self.count.get().wrapping_add(delta as u16));
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.set(count);
    }
}

/// Counts how many times it was fired.
#[derive(Clone, Debug, Default)]
pub struct CountingTrigger {
    fired: Rc<Cell<u32>>,
    failures: Rc<Cell<usize>>,
}

impl CountingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) -> Result<(), MockError> {
        if take_failure(&self.failures) {
            return Err(MockError::Injected);
        }
        self.fired.set(self.fired.get() + 1);
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.fired.get()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.set(count);
    }
}

fn take_failure(failures: &Cell<usize>) -> bool {
    let remaining = failures.get();
    if remaining > 0 {
        failures.set(remaining - 1);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encoder_wraps() {
        let encoder = ScriptedEncoder::new();
        encoder.step(-1);
        assert_eq!(encoder.read(), Ok(0xFFFF));
        encoder.step(2);
        assert_eq!(encoder.read(), Ok(1));
    }

    #[test]
    fn motor_failures() {
        let motor = RecordingMotor::new();
        motor.fail_next(1);
        assert!(motor.record(0.5).is_err());
        motor.record(0.25).unwrap();
        assert_eq!(motor.history(), vec![0.25]);
    }
}
