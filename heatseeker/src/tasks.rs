// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The tracker's three tasks, and putting them together under a [`Scheduler`].
use core::fmt::Debug;

use embedded_hal::blocking::i2c;
use tracing::{debug, info, warn};

use crate::actuator::{Encoder, Motor, ServoAxis, Trigger};
use crate::bus::BusError;
use crate::camera::Camera;
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::FaultKind;
use crate::hotspot::HotspotLocator;
use crate::scheduler::{AimCommand, Scheduler, Shared, Task, TaskStatus};

/// A fully assembled tracker.
pub type Tracker<I2C, C, M, E, T> =
    Scheduler<CameraTask<I2C, C>, ControlTask<M, E>, TriggerTask<T>, C>;

/// Validate `config`, bring up the camera and wire every task into a scheduler.
///
/// Both axes use the same PID tuning. A tilt axis is only driven when `tilt` is given and the
/// configuration maps it.
pub fn build_tracker<I2C, C, M, E, T>(
    i2c: I2C,
    clock: C,
    pan: (M, E),
    tilt: Option<(M, E)>,
    trigger: T,
    config: &TrackerConfig,
) -> Result<Tracker<I2C, C, M, E, T>, BusError<I2C>>
where
    I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
    <I2C as i2c::WriteRead>::Error: Debug,
    C: Clock + Clone,
    M: Motor,
    M::Error: Debug,
    E: Encoder,
    E::Error: Debug,
    T: Trigger,
    T::Error: Debug,
{
    config.validate()?;
    let camera = Camera::new(i2c, clock.clone(), &config.camera)?;
    let camera_task = CameraTask::new(camera, HotspotLocator::new(&config.hotspot));
    let (pan_motor, pan_encoder) = pan;
    let pan = ServoAxis::new(pan_motor, pan_encoder, config.aim.pan, config.pid);
    let tilt = match (tilt, config.aim.tilt) {
        (Some((motor, encoder)), Some(map)) => {
            Some(ServoAxis::new(motor, encoder, map, config.pid))
        }
        _ => None,
    };
    let control_task = ControlTask::new(pan, tilt, config);
    let trigger_task = TriggerTask::new(trigger, config);
    Ok(Scheduler::new(
        camera_task,
        control_task,
        trigger_task,
        clock,
        &config.scheduler,
    ))
}

/// Pulls frames from the camera and publishes them with the target found in each.
#[derive(Debug)]
pub struct CameraTask<I2C, C> {
    camera: Camera<I2C, C>,
    locator: HotspotLocator,
}

impl<I2C, C> CameraTask<I2C, C> {
    pub fn new(camera: Camera<I2C, C>, locator: HotspotLocator) -> Self {
        Self { camera, locator }
    }

    pub fn camera(&self) -> &Camera<I2C, C> {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera<I2C, C> {
        &mut self.camera
    }

    pub fn into_camera(self) -> Camera<I2C, C> {
        self.camera
    }
}

impl<I2C, C> Task for CameraTask<I2C, C>
where
    I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
    <I2C as i2c::WriteRead>::Error: Debug,
    C: Clock,
{
    fn step(&mut self, now_ms: u64, shared: &mut Shared) -> Result<TaskStatus, FaultKind> {
        let frame = match self.camera.poll() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(TaskStatus::Yielded),
            Err(error) => {
                warn!(?error, "camera poll failed");
                return Err(error.kind());
            }
        };
        let target = self.locator.locate(&frame);
        debug!(
            valid = target.is_valid(),
            location = ?target.location(),
            hottest = ?target.hottest().map(|hotspot| hotspot.temperature),
            "target published"
        );
        // Frame first, so a reader of the target can always find the frame it came from
        shared.frame.publish(frame, now_ms);
        shared.target.publish(target, now_ms);
        Ok(TaskStatus::Done)
    }

    fn restart(&mut self) {
        self.camera.reset();
    }
}

/// Steers every axis towards the latest fresh target, or holds them neutral.
#[derive(Debug)]
pub struct ControlTask<M, E> {
    pan: ServoAxis<M, E>,
    tilt: Option<ServoAxis<M, E>>,
    lock_tolerance: u32,
    max_target_age_ms: u64,
    period_ms: u64,
    last_step_ms: Option<u64>,
    aiming: bool,
}

impl<M, E> ControlTask<M, E>
where
    M: Motor,
    M::Error: Debug,
    E: Encoder,
    E::Error: Debug,
{
    pub fn new(
        pan: ServoAxis<M, E>,
        tilt: Option<ServoAxis<M, E>>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            pan,
            tilt,
            lock_tolerance: config.aim.lock_tolerance,
            max_target_age_ms: u64::from(config.scheduler.max_target_age_ms),
            period_ms: u64::from(config.scheduler.control_period_ms),
            last_step_ms: None,
            aiming: false,
        }
    }

    pub fn pan(&self) -> &ServoAxis<M, E> {
        &self.pan
    }

    pub fn tilt(&self) -> Option<&ServoAxis<M, E>> {
        self.tilt.as_ref()
    }

    /// Whether the last step was steering towards a target.
    pub fn is_aiming(&self) -> bool {
        self.aiming
    }

    fn neutral(&mut self) -> Result<(), FaultKind> {
        self.pan.neutral().map_err(actuator_fault)?;
        if let Some(tilt) = self.tilt.as_mut() {
            tilt.neutral().map_err(actuator_fault)?;
        }
        Ok(())
    }

    fn reset_controllers(&mut self) {
        self.pan.pid_mut().reset();
        if let Some(tilt) = self.tilt.as_mut() {
            tilt.pid_mut().reset();
        }
    }

    /// Seconds since the previous step, or one period if there is no usable previous step.
    fn timestep(&self, now_ms: u64) -> f32 {
        let elapsed = self
            .last_step_ms
            .map(|last| now_ms.saturating_sub(last))
            .filter(|elapsed| *elapsed > 0)
            .unwrap_or(self.period_ms);
        elapsed as f32 / 1000.0
    }
}

impl<M, E> Task for ControlTask<M, E>
where
    M: Motor,
    M::Error: Debug,
    E: Encoder,
    E::Error: Debug,
{
    fn step(&mut self, now_ms: u64, shared: &mut Shared) -> Result<TaskStatus, FaultKind> {
        let dt = self.timestep(now_ms);
        self.last_step_ms = Some(now_ms);
        // Encoders are read every step to keep up with counter wraparound
        let pan_position = self.pan.position().map_err(actuator_fault)?;
        let tilt_position = match self.tilt.as_mut() {
            Some(tilt) => Some(tilt.position().map_err(actuator_fault)?),
            None => None,
        };
        let location = shared
            .target
            .fresh(now_ms, self.max_target_age_ms)
            .and_then(|target| target.location());
        let (row, column) = match location {
            Some(location) => location,
            None => {
                if self.aiming {
                    debug!("no fresh target, holding neutral");
                }
                self.aiming = false;
                self.neutral()?;
                shared.command.publish(AimCommand::NEUTRAL, now_ms);
                return Ok(TaskStatus::Done);
            }
        };
        if !self.aiming {
            self.reset_controllers();
            self.aiming = true;
        }
        let tolerance = self.lock_tolerance;
        let (pan, pan_locked) = track(&mut self.pan, now_ms, pan_position, column, dt, tolerance)?;
        let (tilt, tilt_locked) = match (self.tilt.as_mut(), tilt_position) {
            (Some(axis), Some(position)) => track(axis, now_ms, position, row, dt, tolerance)?,
            _ => (0.0, true),
        };
        shared.command.publish(
            AimCommand {
                pan,
                tilt,
                on_target: pan_locked && tilt_locked,
            },
            now_ms,
        );
        Ok(TaskStatus::Done)
    }

    fn restart(&mut self) {
        self.reset_controllers();
        self.aiming = false;
        self.last_step_ms = None;
    }

    fn hold(&mut self) -> Result<(), FaultKind> {
        self.aiming = false;
        self.neutral()
    }
}

/// Run one axis towards `pixel`, returning the duty cycle used and whether it is locked on.
///
/// Pixels the axis cannot reach hold it neutral. Every aimed step is added to the axis's step
/// response.
fn track<M, E>(
    axis: &mut ServoAxis<M, E>,
    now_ms: u64,
    position: i32,
    pixel: usize,
    dt: f32,
    tolerance: u32,
) -> Result<(f32, bool), FaultKind>
where
    M: Motor,
    M::Error: Debug,
    E: Encoder,
{
    axis.record_response(now_ms, position);
    let setpoint = match axis.map().setpoint(pixel) {
        Some(setpoint) => setpoint,
        None => {
            axis.pid_mut().reset();
            axis.neutral().map_err(actuator_fault)?;
            return Ok((0.0, false));
        }
    };
    let command = axis.pid_mut().step(setpoint as f32, position as f32, dt)?;
    axis.drive(command).map_err(actuator_fault)?;
    Ok((axis.duty(), setpoint.abs_diff(position) <= tolerance))
}

fn actuator_fault<T: Debug>(error: T) -> FaultKind {
    warn!(?error, "actuator error");
    FaultKind::Actuator
}

/// Fires once the aim has stayed locked on for long enough.
#[derive(Debug)]
pub struct TriggerTask<T> {
    trigger: T,
    lock_periods: u16,
    rearm: bool,
    max_command_age_ms: u64,
    locked_for: u16,
    armed: bool,
    shots: u32,
}

impl<T> TriggerTask<T>
where
    T: Trigger,
    T::Error: Debug,
{
    /// Aim commands older than one control period are treated as lost.
    pub fn new(trigger: T, config: &TrackerConfig) -> Self {
        Self {
            trigger,
            lock_periods: config.trigger.lock_periods,
            rearm: config.trigger.rearm,
            max_command_age_ms: u64::from(config.scheduler.control_period_ms),
            locked_for: 0,
            armed: true,
            shots: 0,
        }
    }

    pub fn shots(&self) -> u32 {
        self.shots
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl<T> Task for TriggerTask<T>
where
    T: Trigger,
    T::Error: Debug,
{
    /// Each step looks at the newest aim command. A command the control task has not refreshed
    /// within one of its periods does not count as locked on.
    fn step(&mut self, now_ms: u64, shared: &mut Shared) -> Result<TaskStatus, FaultKind> {
        let locked = shared
            .command
            .fresh(now_ms, self.max_command_age_ms)
            .map_or(false, |command| command.on_target);
        if !locked {
            self.locked_for = 0;
            if self.rearm {
                self.armed = true;
            }
            return Ok(TaskStatus::Done);
        }
        self.locked_for = self.locked_for.saturating_add(1);
        if self.armed && self.locked_for >= self.lock_periods {
            self.trigger.fire().map_err(actuator_fault)?;
            self.armed = false;
            self.shots += 1;
            info!(now_ms, shots = self.shots, "fired");
        }
        Ok(TaskStatus::Done)
    }

    /// Starts counting the lock over. A trigger that does not rearm stays spent.
    fn restart(&mut self) {
        self.locked_for = 0;
    }
}
