// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Fixtures for exercising `heatseeker` without hardware.
mod doubles;
mod eeprom_data;
mod sensor_bus;

pub use doubles::{CountingTrigger, ManualClock, RecordingMotor, ScriptedEncoder};
pub use eeprom_data::{datasheet_eeprom, EEPROM_LENGTH};
pub use sensor_bus::{
    datasheet_ram, datasheet_sensor, datasheet_sensor_at_address, I2cOperation, MockError,
    MockSensorBus, RAM_LENGTH,
};
