// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Static configuration for a tracker run.
//!
//! Every section is plain `Copy` data with a [`Default`] matching the reference build. Nothing
//! here changes once the tracker is running. Call [`TrackerConfig::validate`] before handing the
//! configuration to anything else.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::actuator::AxisMap;
use crate::error::ConfigError;
use crate::mlx90640::DEFAULT_ADDRESS;
use crate::register::{FrameRate, ReorderPattern, Resolution};

/// How the sensor is set up and read.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CameraConfig {
    pub frame_rate: FrameRate,

    /// Must match the mode the sensor ends up in.
    pub pattern: ReorderPattern,

    pub resolution: Resolution,

    /// Emissivity of the targets, in (0, 1].
    pub emissivity: f32,

    /// How many status polls to spend on one sub-page before giving up.
    pub max_polls: u16,

    /// 7-bit I²C address of the sensor.
    pub address: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_rate: FrameRate::default(),
            pattern: ReorderPattern::default(),
            resolution: Resolution::default(),
            emissivity: 1.0,
            max_polls: 50,
            address: DEFAULT_ADDRESS,
        }
    }
}

/// When a hotspot is worth aiming at.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HotspotConfig {
    /// Frames with fewer valid pixels than this never produce a target.
    pub min_valid_pixels: usize,

    /// The coldest a hotspot may be, in °C.
    pub threshold: f32,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            min_valid_pixels: 384,
            threshold: 30.0,
        }
    }
}

/// Gains and clamps for one PID loop.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub integral_min: f32,
    pub integral_max: f32,
    pub output_min: f32,
    pub output_max: f32,
}

impl PidConfig {
    /// Gains only. Both the integral and the output are clamped to [-1, 1] until told otherwise.
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral_min: -1.0,
            integral_max: 1.0,
            output_min: -1.0,
            output_max: 1.0,
        }
    }

    pub const fn with_integral_limits(mut self, min: f32, max: f32) -> Self {
        self.integral_min = min;
        self.integral_max = max;
        self
    }

    pub const fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let gains = [self.kp, self.ki, self.kd];
        let bounds = [
            self.integral_min,
            self.integral_max,
            self.output_min,
            self.output_max,
        ];
        if gains.iter().chain(bounds.iter()).any(|value| !value.is_finite()) {
            return Err(ConfigError::OutOfRange("pid"));
        }
        if self.integral_min > self.integral_max {
            return Err(ConfigError::InvertedBounds("pid.integral"));
        }
        if self.output_min > self.output_max {
            return Err(ConfigError::InvertedBounds("pid.output"));
        }
        Ok(())
    }
}

impl Default for PidConfig {
    /// Tuned against encoder counts, with the output as a duty fraction.
    fn default() -> Self {
        Self::new(0.0017, 0.0001, 0.0).with_integral_limits(-2000.0, 2000.0)
    }
}

/// How targets in the image map to actuator positions.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AimConfig {
    /// Driven from the target's column.
    pub pan: AxisMap,

    /// Driven from the target's row, when the rig has a second axis.
    pub tilt: Option<AxisMap>,

    /// How close, in encoder counts, every axis must be to its setpoint to count as locked on.
    pub lock_tolerance: u32,
}

impl Default for AimConfig {
    fn default() -> Self {
        Self {
            pan: AxisMap::default(),
            tilt: None,
            lock_tolerance: 5,
        }
    }
}

/// When to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TriggerConfig {
    /// Consecutive trigger periods that must each see a fresh, locked-on aim command before
    /// firing. A command is fresh for one control period after it is published.
    pub lock_periods: u16,

    /// Allow firing again after the lock is lost and regained. Otherwise the trigger fires once
    /// per run.
    pub rearm: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            lock_periods: 3,
            rearm: true,
        }
    }
}

/// Timing and fault policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// How often the scheduler wakes up.
    pub tick_ms: u32,

    pub camera_period_ms: u32,
    pub control_period_ms: u32,
    pub trigger_period_ms: u32,

    /// Consecutive transient faults a task may report before the tracker holds safe.
    pub retry_limit: u16,

    /// The oldest a published target may be and still be aimed at.
    pub max_target_age_ms: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5,
            camera_period_ms: 45,
            control_period_ms: 10,
            trigger_period_ms: 45,
            retry_limit: 3,
            max_target_age_ms: 1_500,
        }
    }
}

/// Everything a tracker run needs to know up front.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrackerConfig {
    pub camera: CameraConfig,
    pub hotspot: HotspotConfig,

    /// Shared by every axis.
    pub pid: PidConfig,

    pub aim: AimConfig,
    pub trigger: TriggerConfig,
    pub scheduler: SchedulerConfig,
}

impl TrackerConfig {
    /// Reject values that cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Camera
        let camera = &self.camera;
        if !(camera.emissivity > 0.0 && camera.emissivity <= 1.0) {
            return Err(ConfigError::OutOfRange("camera.emissivity"));
        }
        if camera.max_polls == 0 {
            return Err(ConfigError::Zero("camera.max_polls"));
        }
        if camera.address > 0x7F {
            return Err(ConfigError::OutOfRange("camera.address"));
        }

        // Hotspot
        if !self.hotspot.threshold.is_finite() {
            return Err(ConfigError::OutOfRange("hotspot.threshold"));
        }
        if self.hotspot.min_valid_pixels > crate::mlx90640::NUM_PIXELS {
            return Err(ConfigError::OutOfRange("hotspot.min_valid_pixels"));
        }

        self.pid.validate()?;

        // Aim
        self.aim.pan.validate("aim.pan")?;
        if let Some(tilt) = &self.aim.tilt {
            tilt.validate("aim.tilt")?;
        }

        // Trigger
        if self.trigger.lock_periods == 0 {
            return Err(ConfigError::Zero("trigger.lock_periods"));
        }

        // Scheduler
        let scheduler = &self.scheduler;
        let periods = [
            ("scheduler.tick_ms", scheduler.tick_ms),
            ("scheduler.camera_period_ms", scheduler.camera_period_ms),
            ("scheduler.control_period_ms", scheduler.control_period_ms),
            ("scheduler.trigger_period_ms", scheduler.trigger_period_ms),
            ("scheduler.max_target_age_ms", scheduler.max_target_age_ms),
        ];
        for (name, period) in periods {
            if period == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TrackerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn pid_builders() {
        let config = PidConfig::new(1.0, 2.0, 3.0)
            .with_integral_limits(-5.0, 5.0)
            .with_output_limits(-0.5, 0.25);
        assert_eq!(config.kd, 3.0);
        assert_eq!(config.integral_max, 5.0);
        assert_eq!(config.output_min, -0.5);
        // Untouched limits keep the unit default
        assert_eq!(PidConfig::new(1.0, 0.0, 0.0).output_max, 1.0);
    }

    #[rstest]
    #[case::zero_emissivity(
        |c: &mut TrackerConfig| c.camera.emissivity = 0.0,
        ConfigError::OutOfRange("camera.emissivity")
    )]
    #[case::emissivity_over_one(
        |c: &mut TrackerConfig| c.camera.emissivity = 1.2,
        ConfigError::OutOfRange("camera.emissivity")
    )]
    #[case::zero_poll_budget(
        |c: &mut TrackerConfig| c.camera.max_polls = 0,
        ConfigError::Zero("camera.max_polls")
    )]
    #[case::inverted_integral(
        |c: &mut TrackerConfig| c.pid = c.pid.with_integral_limits(1.0, -1.0),
        ConfigError::InvertedBounds("pid.integral")
    )]
    #[case::inverted_output(
        |c: &mut TrackerConfig| c.pid = c.pid.with_output_limits(0.5, -0.5),
        ConfigError::InvertedBounds("pid.output")
    )]
    #[case::nan_gain(
        |c: &mut TrackerConfig| c.pid.kp = f32::NAN,
        ConfigError::OutOfRange("pid")
    )]
    #[case::zero_lock_periods(
        |c: &mut TrackerConfig| c.trigger.lock_periods = 0,
        ConfigError::Zero("trigger.lock_periods")
    )]
    #[case::zero_control_period(
        |c: &mut TrackerConfig| c.scheduler.control_period_ms = 0,
        ConfigError::Zero("scheduler.control_period_ms")
    )]
    #[case::inverted_pan_span(
        |c: &mut TrackerConfig| {
            c.aim.pan.first_pixel = 20;
            c.aim.pan.last_pixel = 5;
        },
        ConfigError::InvertedBounds("aim.pan")
    )]
    fn rejected(#[case] edit: fn(&mut TrackerConfig), #[case] expected: ConfigError) {
        let mut config = TrackerConfig::default();
        edit(&mut config);
        assert_eq!(config.validate(), Err(expected));
    }
}
