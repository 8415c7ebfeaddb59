// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Single-axis PID control.
//!
//! Works in `no_std` and does not allocate.
use crate::config::PidConfig;
use crate::error::InvalidTimestep;

/// The part of a controller that changes from step to step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlState {
    /// Accumulated error × time, kept within the integral bounds.
    pub integral: f32,

    /// The error from the previous step, if there was one since the last reset.
    pub previous_error: Option<f32>,
}

/// PID controller with an integral clamp against windup and a clamped output.
#[derive(Clone, Debug, PartialEq)]
pub struct PidController {
    config: PidConfig,
    state: ControlState,
}

impl PidController {
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            state: ControlState::default(),
        }
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Forget the integral and the previous error.
    ///
    /// Needed whenever the loop is paused and resumed, otherwise the first step back sees a stale
    /// derivative and an integral built up against the old target.
    pub fn reset(&mut self) {
        self.state = ControlState::default();
    }

    /// Advance the controller by `dt` seconds and return the clamped command.
    ///
    /// The derivative term is zero on the first step after construction or [`reset`][Self::reset].
    /// A `dt` that is not strictly positive is rejected and leaves the state untouched. So does a
    /// setpoint or measurement that is not finite, except that the command is neutral (0).
    pub fn step(
        &mut self,
        setpoint: f32,
        measurement: f32,
        dt: f32,
    ) -> Result<f32, InvalidTimestep> {
        // Written to also catch NaN
        if !(dt > 0.0) {
            return Err(InvalidTimestep { dt });
        }
        let config = &self.config;
        let error = setpoint - measurement;
        if !error.is_finite() {
            return Ok(0.0);
        }
        let integral = clamp(
            self.state.integral + error * dt,
            config.integral_min,
            config.integral_max,
        );
        let derivative = match self.state.previous_error {
            Some(previous) => (error - previous) / dt,
            None => 0.0,
        };
        self.state = ControlState {
            integral,
            previous_error: Some(error),
        };
        let output = config.kp * error + config.ki * integral + config.kd * derivative;
        Ok(clamp(output, config.output_min, config.output_max))
    }
}

/// Like `f32::clamp`, without the panic on bounds that were never validated. NaN maps to 0.
fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.max(min).min(max)
}
