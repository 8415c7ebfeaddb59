// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Thermal-camera target tracking on a single core.
//!
//! This crate reads an MLX90640 thermopile array over I²C, turns its raw output into calibrated
//! temperature frames, picks out the hottest point in each frame, and steers a motor (or two)
//! towards it with a PID loop. A small cooperative scheduler runs all of that in fixed periods
//! without blocking, so it can share a microcontroller with whatever else needs doing.
//!
//! Hardware is reached through the [`embedded-hal`][embedded-hal] I²C traits and the small
//! [`Motor`][actuator::Motor], [`Encoder`][actuator::Encoder] and [`Trigger`][actuator::Trigger]
//! traits, so the crate runs anywhere those can be implemented. It is `no_std`, and does not
//! allocate. Float math needs either the `std` feature (on by default) or the `libm` feature.
//!
//! [embedded-hal]: https://docs.rs/embedded-hal/*/embedded_hal/blocking/i2c/index.html
//!
//! # Putting it together
//! ```no_run
//! use heatseeker::{build_tracker, Mode, MonotonicClock, TrackerConfig};
//! # use heatseeker::actuator::{Encoder, Motor, Trigger};
//! # struct Pwm;
//! # impl Motor for Pwm {
//! #     type Error = ();
//! #     fn set_duty(&mut self, _duty: f32) -> Result<(), ()> { Ok(()) }
//! # }
//! # struct Quadrature;
//! # impl Encoder for Quadrature {
//! #     type Error = ();
//! #     fn read_count(&mut self) -> Result<u16, ()> { Ok(0) }
//! # }
//! # struct Solenoid;
//! # impl Trigger for Solenoid {
//! #     type Error = ();
//! #     fn fire(&mut self) -> Result<(), ()> { Ok(()) }
//! # }
//! # let i2c_bus = heatseeker_test_data::datasheet_sensor();
//!
//! let config = TrackerConfig::default();
//! let mut tracker = build_tracker(
//!     i2c_bus,
//!     MonotonicClock::new(),
//!     (Pwm, Quadrature),
//!     None,
//!     Solenoid,
//!     &config,
//! )?;
//! tracker.run_until(|tracker| matches!(tracker.mode(), Mode::SafeHold(_)));
//! # Ok::<(), heatseeker::Error<heatseeker_test_data::MockError>>(())
//! ```
//! [`build_tracker`] checks the configuration, loads the camera's calibration data and wires
//! three tasks into a [`Scheduler`]:
//!
//! * the camera task polls the sensor, converts complete frames and publishes the target,
//! * the control task runs each axis towards the target, or holds it still when there is no
//!   recent target,
//! * the trigger task fires once the aim has held steady for long enough.
//!
//! The pieces are usable on their own too. [`Camera`] is a complete driver for the sensor, and
//! [`PidController`] and [`HotspotLocator`] are plain computations with no hardware attached.
//!
//! # Faults
//! Communication faults and acquisition timeouts are retried, up to
//! [`SchedulerConfig::retry_limit`] times in a row. Anything else, or too many retries, puts the
//! tracker in [safe-hold][Mode::SafeHold]: every motor is driven to neutral and stays there until
//! [`Scheduler::clear_safe_hold`] is called.
//!
//! # Sub-pages and reorder patterns
//! The sensor does not update the whole image at once. Pixels are split between two
//! [sub-pages][Subpage] which are refreshed in turn, and a frame is only complete once both have
//! been read. How pixels are split depends on the [reorder pattern][ReorderPattern]. In chess
//! mode, pixels alternate sub-pages along both axes:
//! ```text
//! 0 1 0 1 0 1 0 1
//! 1 0 1 0 1 0 1 0
//! 0 1 0 1 0 1 0 1
//! 1 0 1 0 1 0 1 0
//! ```
//! Interleaved mode alternates whole rows:
//! ```text
//! 0 0 0 0 0 0 0 0
//! 1 1 1 1 1 1 1 1
//! 0 0 0 0 0 0 0 0
//! 1 1 1 1 1 1 1 1
//! ```
//! The sensor is calibrated in chess mode, which is also the default.

#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod acquire;
pub mod actuator;
pub mod bus;
pub mod calculations;
pub mod camera;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod hotspot;
pub mod mlx90640;
pub mod pid;
pub mod register;
pub mod scheduler;
pub mod tasks;
mod util;

pub use acquire::{AcquireStatus, AcquisitionState, FrameAcquirer};
pub use bus::RegisterBus;
pub use calculations::RadiometricConverter;
pub use camera::Camera;
#[cfg(feature = "std")]
pub use clock::MonotonicClock;
pub use clock::Clock;
pub use config::{
    AimConfig, CameraConfig, HotspotConfig, PidConfig, SchedulerConfig, TrackerConfig,
    TriggerConfig,
};
pub use error::{CalibrationError, ConfigError, Error, FaultKind, InvalidTimestep};
pub use frame::{RawFrame, SubFrame, TemperatureFrame};
pub use hotspot::{Hotspot, HotspotLocator, Target};
pub use mlx90640::CalibrationSet;
pub use pid::{ControlState, PidController};
pub use register::*;
pub use scheduler::{Mode, Scheduler, Share, Shared, Task, TaskId, TaskSlot, TaskStatus};
pub use tasks::{build_tracker, Tracker};
