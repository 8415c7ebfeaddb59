// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The moving parts: motors, encoders, the trigger, and the mapping from image pixels to encoder
//! positions.
use arrayvec::ArrayVec;
#[cfg(not(feature = "std"))]
use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::PidConfig;
use crate::error::ConfigError;
use crate::pid::PidController;

/// A motor driven by a signed duty cycle.
pub trait Motor {
    type Error;

    /// `duty` is a fraction in [-1, 1]. 0 stops the motor.
    fn set_duty(&mut self, duty: f32) -> Result<(), Self::Error>;
}

/// A wrapping 16-bit quadrature counter.
pub trait Encoder {
    type Error;

    fn read_count(&mut self) -> Result<u16, Self::Error>;
}

/// Starts a launch sequence. Every call is one shot.
pub trait Trigger {
    type Error;

    fn fire(&mut self) -> Result<(), Self::Error>;
}

/// Extends a wrapping 16-bit counter into a signed 32-bit position.
///
/// Moves of more than half the counter range between two reads are taken as wrapping the other
/// way, so the counter must be read at least that often.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncoderCounter {
    last_raw: Option<u16>,
    position: i32,
}

impl EncoderCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a new raw count into the position and return it.
    ///
    /// The first count only sets the baseline.
    pub fn update(&mut self, raw: u16) -> i32 {
        if let Some(last) = self.last_raw {
            let delta = raw.wrapping_sub(last) as i16;
            self.position = self.position.wrapping_add(i32::from(delta));
        }
        self.last_raw = Some(raw);
        self.position
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    /// Make the current position 0.
    pub fn zero(&mut self) {
        self.position = 0;
    }
}

/// Linear map from a pixel row or column to an encoder setpoint.
///
/// Only pixels within `first_pixel..=last_pixel` can be aimed at.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisMap {
    pub first_pixel: usize,
    pub last_pixel: usize,

    /// The setpoint for `first_pixel`.
    pub origin_counts: f32,

    pub counts_per_pixel: f32,
}

impl AxisMap {
    /// The encoder position that aims at `pixel`, or `None` when it is out of reach.
    pub fn setpoint(&self, pixel: usize) -> Option<i32> {
        if pixel < self.first_pixel || pixel > self.last_pixel {
            return None;
        }
        let steps = (pixel - self.first_pixel) as f32;
        Some((self.origin_counts + steps * self.counts_per_pixel).round() as i32)
    }

    pub(crate) fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.first_pixel > self.last_pixel {
            return Err(ConfigError::InvertedBounds(name));
        }
        if !(self.origin_counts.is_finite() && self.counts_per_pixel.is_finite()) {
            return Err(ConfigError::OutOfRange(name));
        }
        Ok(())
    }
}

impl Default for AxisMap {
    /// The pan rig: 16 aimable columns in the middle of the frame.
    fn default() -> Self {
        Self {
            first_pixel: 5,
            last_pixel: 20,
            origin_counts: -25475.0,
            counts_per_pixel: -173.6,
        }
    }
}

/// How many samples a [`ServoAxis`] keeps of its step response.
pub const RESPONSE_CAPACITY: usize = 200;

/// One closed-loop axis: a motor, the encoder on its shaft, and the controller between them.
#[derive(Debug)]
pub struct ServoAxis<M, E> {
    motor: M,
    encoder: E,
    counter: EncoderCounter,
    map: AxisMap,
    pid: PidController,
    duty: f32,

    /// Milliseconds since the first sample, and the position at that time.
    response: ArrayVec<(u64, i32), RESPONSE_CAPACITY>,
    response_start: Option<u64>,
}

impl<M, E> ServoAxis<M, E>
where
    M: Motor,
    E: Encoder,
{
    pub fn new(motor: M, encoder: E, map: AxisMap, pid: PidConfig) -> Self {
        Self {
            motor,
            encoder,
            counter: EncoderCounter::new(),
            map,
            pid: PidController::new(pid),
            duty: 0.0,
            response: ArrayVec::new(),
            response_start: None,
        }
    }

    pub fn map(&self) -> &AxisMap {
        &self.map
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    pub fn pid_mut(&mut self) -> &mut PidController {
        &mut self.pid
    }

    /// The last duty cycle sent to the motor.
    pub fn duty(&self) -> f32 {
        self.duty
    }

    /// Read the encoder and return the unwrapped position.
    pub fn position(&mut self) -> Result<i32, E::Error> {
        let raw = self.encoder.read_count()?;
        Ok(self.counter.update(raw))
    }

    /// Declare the current shaft position to be 0.
    pub fn zero(&mut self) {
        self.counter.zero();
    }

    /// Drive the motor, clamping to the valid duty range.
    pub fn drive(&mut self, duty: f32) -> Result<(), M::Error> {
        let duty = if duty.is_nan() {
            0.0
        } else {
            duty.max(-1.0).min(1.0)
        };
        self.motor.set_duty(duty)?;
        self.duty = duty;
        Ok(())
    }

    pub fn neutral(&mut self) -> Result<(), M::Error> {
        self.drive(0.0)
    }

    /// Note where the axis was at `now_ms`. Samples past the first [`RESPONSE_CAPACITY`] are
    /// dropped.
    pub fn record_response(&mut self, now_ms: u64, position: i32) {
        if self.response.is_full() {
            return;
        }
        let start = *self.response_start.get_or_insert(now_ms);
        self.response.push((now_ms.saturating_sub(start), position));
    }

    /// The recorded step response, oldest first.
    pub fn response(&self) -> &[(u64, i32)] {
        &self.response
    }

    /// Discard the recorded response so the next sample starts a new one.
    pub fn clear_response(&mut self) {
        self.response.clear();
        self.response_start = None;
    }

    /// Tear down, handing back the motor and encoder.
    pub fn release(self) -> (M, E) {
        (self.motor, self.encoder)
    }
}

#[cfg(test)]
impl Motor for heatseeker_test_data::RecordingMotor {
    type Error = heatseeker_test_data::MockError;

    fn set_duty(&mut self, duty: f32) -> Result<(), Self::Error> {
        self.record(duty)
    }
}

#[cfg(test)]
impl Encoder for heatseeker_test_data::ScriptedEncoder {
    type Error = heatseeker_test_data::MockError;

    fn read_count(&mut self) -> Result<u16, Self::Error> {
        self.read()
    }
}

#[cfg(test)]
impl Trigger for heatseeker_test_data::CountingTrigger {
    type Error = heatseeker_test_data::MockError;

    fn fire(&mut self) -> Result<(), Self::Error> {
        heatseeker_test_data::CountingTrigger::fire(self)
    }
}

#[cfg(test)]
mod test {
    use heatseeker_test_data::{RecordingMotor, ScriptedEncoder};
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    /// The encoder positions the pan rig was calibrated with, columns 5 to 20.
    const PAN_TABLE: [i32; 16] = [
        -25475, -25648, -25822, -25995, -26169, -26343, -26516, -26690, -26864, -27037, -27211,
        -27385, -27558, -27732, -27906, -28079,
    ];

    #[test]
    fn default_map_follows_calibration_table() {
        let map = AxisMap::default();
        for (offset, expected) in PAN_TABLE.iter().enumerate() {
            let setpoint = map.setpoint(offset + 5).unwrap();
            assert!(
                (setpoint - expected).abs() <= 1,
                "column {}: {} vs {}",
                offset + 5,
                setpoint,
                expected
            );
        }
        assert_eq!(map.setpoint(5), Some(-25475));
        assert_eq!(map.setpoint(20), Some(-28079));
    }

    #[test]
    fn response_log_fills_then_stops() {
        let mut axis = ServoAxis::new(
            RecordingMotor::new(),
            ScriptedEncoder::new(),
            AxisMap::default(),
            PidConfig::default(),
        );
        assert!(axis.response().is_empty());
        for sample in 0..(RESPONSE_CAPACITY as u64 + 50) {
            axis.record_response(1_000 + sample * 10, -(sample as i32));
        }
        let response = axis.response();
        assert_eq!(response.len(), RESPONSE_CAPACITY);
        assert_eq!(response[0], (0, 0));
        assert_eq!(response[1], (10, -1));
        assert_eq!(
            response[RESPONSE_CAPACITY - 1],
            (1_990, -(RESPONSE_CAPACITY as i32 - 1))
        );
        axis.clear_response();
        axis.record_response(5_000, 42);
        assert_eq!(axis.response(), [(0, 42)]);
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    #[case(21)]
    #[case(31)]
    fn out_of_span(#[case] column: usize) {
        assert_eq!(AxisMap::default().setpoint(column), None);
    }

    #[rstest]
    #[case(&[0, 100, 200], 200)]
    #[case(&[10, 0xFFF0, 0x0005], -5)]
    #[case(&[0xFFF0, 0x0010], 0x20)]
    #[case(&[0, 0x7FFF], 0x7FFF)]
    #[case(&[0, 0x8001], -0x7FFF)]
    fn counter_unwraps(#[case] counts: &[u16], #[case] expected: i32) {
        let mut counter = EncoderCounter::new();
        for count in counts {
            counter.update(*count);
        }
        assert_eq!(counter.position(), expected);
    }

    #[test]
    fn counter_zero_keeps_baseline() {
        let mut counter = EncoderCounter::new();
        counter.update(1000);
        counter.update(1500);
        counter.zero();
        assert_eq!(counter.update(1600), 100);
    }

    #[test]
    fn servo_axis_reads_and_drives() {
        let motor = RecordingMotor::new();
        let encoder = ScriptedEncoder::new();
        let mut axis = ServoAxis::new(
            motor.clone(),
            encoder.clone(),
            AxisMap::default(),
            PidConfig::default(),
        );
        encoder.set_count(10);
        assert_eq!(axis.position(), Ok(0));
        encoder.step(-30);
        assert_eq!(axis.position(), Ok(-30));
        axis.drive(2.5).unwrap();
        axis.drive(-0.25).unwrap();
        axis.neutral().unwrap();
        assert_eq!(motor.history(), [1.0, -0.25, 0.0]);
    }

    #[test]
    fn failed_drive_keeps_last_duty() {
        let motor = RecordingMotor::new();
        let mut axis = ServoAxis::new(
            motor.clone(),
            ScriptedEncoder::new(),
            AxisMap::default(),
            PidConfig::default(),
        );
        axis.drive(0.5).unwrap();
        motor.fail_next(1);
        assert!(axis.drive(-0.5).is_err());
        assert_eq!(axis.duty(), 0.5);
    }

    proptest! {
        #[test]
        fn counter_tracks_small_steps(
            steps in proptest::collection::vec(-30_000i32..30_000, 1..50)
        ) {
            let encoder = ScriptedEncoder::new();
            let mut counter = EncoderCounter::new();
            counter.update(encoder.read().unwrap());
            let mut expected = 0i32;
            for step in steps {
                encoder.step(step);
                expected += step;
                prop_assert_eq!(counter.update(encoder.read().unwrap()), expected);
            }
        }
    }
}
