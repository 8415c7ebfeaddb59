// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The camera driver: calibration, sensor settings and acquisition behind one owned value.
use embedded_hal::blocking::i2c;
use paste::paste;
use tracing::{debug, info};

use crate::acquire::{AcquireStatus, AcquisitionState, FrameAcquirer};
use crate::bus::{BusError, RegisterBus};
use crate::calculations::RadiometricConverter;
use crate::clock::Clock;
use crate::config::CameraConfig;
use crate::error::ConfigError;
use crate::frame::TemperatureFrame;
use crate::mlx90640::{CalibrationSet, EepromAddress};
use crate::register::{ControlRegister, FrameRate, ReorderPattern, Resolution};

/// DRY macro for the set_* methods in `Camera` that modify a register field.
///
/// Fields that change how frames are processed name a method to call with the new value once the
/// sensor has accepted it.
macro_rules! set_register_field {
    { $register_access:ident, $field:ident, $typ:ty, $doc:literal $(, then $after:ident)? } => {
    paste! {
        #[doc = $doc]
        pub fn [< set_ $field >](&mut self, new_value: $typ) -> Result<(), BusError<I2C>> {
            let mut current = self.$register_access()?;
            if current.$field() != new_value {
                current.[< set_ $field >](new_value);
                self.bus.update_register(current)?;
            }
            $( self.$after(new_value); )?
            Ok(())
        }
    }};
}

/// An MLX90640 ready to produce temperature frames.
///
/// Created once at startup. Creation reads and checks the calibration block, and fails instead of
/// producing a camera that cannot be trusted. Frames are then pulled out with
/// [`poll`][Camera::poll], which never waits on the sensor.
#[derive(Clone, Debug)]
pub struct Camera<I2C, C> {
    bus: RegisterBus<I2C, C>,
    calibration: CalibrationSet,
    converter: RadiometricConverter,
    acquirer: FrameAcquirer,

    /// From the most recent frame.
    ambient_temperature: Option<f32>,
}

impl<I2C, C> Camera<I2C, C>
where
    I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
    C: Clock,
{
    /// Load the calibration and apply `config` to the sensor.
    ///
    /// The sensor's reorder pattern is checked against the configured one but not changed; use
    /// [`set_reorder_pattern`][Self::set_reorder_pattern] to switch it deliberately.
    pub fn new(i2c: I2C, clock: C, config: &CameraConfig) -> Result<Self, BusError<I2C>> {
        let mut bus = RegisterBus::new(i2c, config.address, clock);
        let mut eeprom = [0u16; EepromAddress::LENGTH];
        bus.read_block(EepromAddress::Base.into(), &mut eeprom)?;
        let calibration = CalibrationSet::load(&eeprom)?;
        let mut camera = Self {
            bus,
            calibration,
            converter: RadiometricConverter::new(config.emissivity, config.resolution),
            acquirer: FrameAcquirer::new(config.pattern, config.max_polls),
            ambient_temperature: None,
        };
        let sensor_pattern = camera.reorder_pattern()?;
        if sensor_pattern != config.pattern {
            return Err(ConfigError::PatternMismatch {
                sensor: sensor_pattern,
                configured: config.pattern,
            }
            .into());
        }
        camera.set_use_subpages(true)?;
        camera.set_frame_rate(config.frame_rate)?;
        camera.set_resolution(config.resolution)?;
        info!(
            address = config.address,
            frame_rate = ?config.frame_rate,
            pattern = ?config.pattern,
            resolution = ?config.resolution,
            bad_pixels = camera.calibration.bad_pixels().count_ones(),
            "camera ready"
        );
        Ok(camera)
    }

    pub fn calibration(&self) -> &CalibrationSet {
        &self.calibration
    }

    pub fn converter(&self) -> &RadiometricConverter {
        &self.converter
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquirer.state()
    }

    pub fn bus(&self) -> &RegisterBus<I2C, C> {
        &self.bus
    }

    /// The ambient temperature of the last frame produced, in °C.
    pub fn ambient_temperature(&self) -> Option<f32> {
        self.ambient_temperature
    }

    fn control_register(&mut self) -> Result<ControlRegister, BusError<I2C>> {
        self.bus.read_register()
    }

    pub fn frame_rate(&mut self) -> Result<FrameRate, BusError<I2C>> {
        self.control_register().map(|register| register.frame_rate())
    }

    pub fn resolution(&mut self) -> Result<Resolution, BusError<I2C>> {
        self.control_register().map(|register| register.resolution())
    }

    pub fn reorder_pattern(&mut self) -> Result<ReorderPattern, BusError<I2C>> {
        self.control_register().map(|register| register.reorder_pattern())
    }

    set_register_field!(
        control_register,
        use_subpages,
        bool,
        "Enable or disable sub-page mode. Acquisition only works with it enabled."
    );

    set_register_field!(
        control_register,
        frame_rate,
        FrameRate,
        "Set how often the sensor refreshes a sub-page."
    );

    set_register_field!(
        control_register,
        resolution,
        Resolution,
        "Set the ADC resolution, and convert frames accordingly.",
        then use_resolution
    );

    set_register_field!(
        control_register,
        reorder_pattern,
        ReorderPattern,
        "Set how pixels are split between sub-pages. Any frame in progress is dropped.\n\n\
        The sensor is calibrated in the chess pattern. The datasheet advises keeping it.",
        then use_pattern
    );

    fn use_resolution(&mut self, resolution: Resolution) {
        self.converter = RadiometricConverter::new(self.converter.emissivity(), resolution);
    }

    fn use_pattern(&mut self, pattern: ReorderPattern) {
        if pattern != self.acquirer.pattern() {
            self.acquirer = FrameAcquirer::new(pattern, self.acquirer.max_polls());
        }
    }

    /// Advance acquisition, returning a converted frame once both sub-pages are in.
    ///
    /// Does at most one status check, plus the reads for a ready sub-page. Errors abandon the
    /// frame in progress.
    pub fn poll(&mut self) -> Result<Option<TemperatureFrame>, BusError<I2C>> {
        if self.acquirer.poll(&mut self.bus)? != AcquireStatus::Ready {
            return Ok(None);
        }
        Ok(self.acquirer.take_frame().map(|raw| {
            let frame = self.converter.convert(&raw, &self.calibration);
            self.ambient_temperature = Some(frame.ambient_temperature());
            debug!(
                ambient = frame.ambient_temperature(),
                valid = frame.valid_count(),
                "frame converted"
            );
            frame
        }))
    }

    /// Drop any frame in progress. The next poll starts from sub-page 0.
    pub fn reset(&mut self) {
        self.acquirer.reset();
    }

    /// Tear down, handing back the bus.
    pub fn release(self) -> I2C {
        info!(address = self.bus.i2c_address(), "camera released");
        self.bus.release()
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use heatseeker_test_data::{datasheet_sensor, I2cOperation, MockError, MockSensorBus};

    use super::*;
    use crate::error::{CalibrationError, Error};
    use crate::mlx90640::NUM_PIXELS;
    use crate::register::Subpage;

    fn camera(mock: &MockSensorBus, config: &CameraConfig) -> Camera<MockSensorBus, impl Clock> {
        Camera::new(mock.clone(), || 0u64, config).unwrap()
    }

    #[test]
    fn applies_configuration() {
        let mock = datasheet_sensor();
        let config = CameraConfig {
            frame_rate: FrameRate::Sixteen,
            resolution: Resolution::Nineteen,
            ..CameraConfig::default()
        };
        let mut camera = camera(&mock, &config);
        let control = ControlRegister::from(mock.control());
        assert_eq!(control.frame_rate(), FrameRate::Sixteen);
        assert_eq!(control.resolution(), Resolution::Nineteen);
        assert!(control.use_subpages());
        assert_eq!(camera.converter().resolution(), Resolution::Nineteen);
        assert_eq!(camera.frame_rate(), Ok(FrameRate::Sixteen));
    }

    #[test]
    fn matching_settings_are_not_rewritten() {
        let mock = datasheet_sensor();
        camera(&mock, &CameraConfig::default());
        assert_eq!(mock.control(), 0x1901);
        assert!(mock
            .recent_operations()
            .iter()
            .all(|operation| matches!(operation, I2cOperation::Read { .. })));
    }

    #[test]
    fn pattern_mismatch_is_fatal() {
        let mock = datasheet_sensor();
        let config = CameraConfig {
            pattern: ReorderPattern::Interleave,
            ..CameraConfig::default()
        };
        let result = Camera::new(mock.clone(), || 0u64, &config);
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigError::PatternMismatch {
                sensor: ReorderPattern::Chess,
                configured: ReorderPattern::Interleave,
            }))
        ));
    }

    #[test]
    fn broken_calibration_is_fatal() {
        let mock = datasheet_sensor();
        // Zero out the gain
        mock.set_eeprom_word(0x2430, 0);
        let result = Camera::new(mock.clone(), || 0u64, &CameraConfig::default());
        assert!(matches!(
            result,
            Err(Error::Calibration(CalibrationError::ZeroCoefficient(_)))
        ));
    }

    #[test]
    fn unreachable_sensor() {
        let mock = datasheet_sensor();
        mock.fail_next(1);
        let result = Camera::new(mock.clone(), || 0u64, &CameraConfig::default());
        assert!(matches!(
            result,
            Err(Error::CommunicationFault(MockError::Injected))
        ));
    }

    #[test]
    fn polls_into_temperatures() {
        let mock = datasheet_sensor();
        let mut camera = camera(&mock, &CameraConfig::default());
        assert_eq!(camera.ambient_temperature(), None);
        assert_eq!(camera.poll(), Ok(None));
        let frame = camera.poll().unwrap().unwrap();
        assert_eq!(frame.valid_count(), NUM_PIXELS);
        assert_approx_eq!(f32, frame.get(11, 15).unwrap(), 80.36, epsilon = 0.5);
        assert_approx_eq!(f32, camera.ambient_temperature().unwrap(), 39.18, epsilon = 0.01);
        // The next frame starts right away
        assert_eq!(
            camera.acquisition_state(),
            AcquisitionState::AwaitingSubFrame(Subpage::Zero)
        );
    }

    #[test]
    fn switching_pattern_restarts_acquisition() {
        let mock = datasheet_sensor();
        let mut camera = camera(&mock, &CameraConfig::default());
        camera.poll().unwrap();
        camera.set_reorder_pattern(ReorderPattern::Interleave).unwrap();
        assert_eq!(camera.acquisition_state(), AcquisitionState::Idle);
        assert_eq!(
            ControlRegister::from(mock.control()).reorder_pattern(),
            ReorderPattern::Interleave
        );
    }

    #[test]
    fn reset_and_release() {
        let mock = datasheet_sensor();
        let mut camera = camera(&mock, &CameraConfig::default());
        camera.poll().unwrap();
        camera.reset();
        assert_eq!(camera.acquisition_state(), AcquisitionState::Idle);
        let bus = camera.release();
        assert_eq!(bus.i2c_address(), 0x33);
    }
}
