// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Constants and data layouts specific to the MLX90640 32×24 thermopile array.
mod address;
mod eeprom;
mod ram;

pub use address::{Access, Address, EepromAddress, RamAddress, RegisterAddress};
pub use eeprom::{CalibrationSet, MAX_BAD_PIXELS};
pub(crate) use eeprom::BASIC_TEMPERATURE_RANGE;
pub use ram::References;

/// The height of the image captured by sensor in pixels.
pub const HEIGHT: usize = 24;

/// The width of the image captured by the sensor in pixels.
pub const WIDTH: usize = 32;

/// The total number of pixels an MLX90640 has.
pub const NUM_PIXELS: usize = HEIGHT * WIDTH;

/// Half of the pixels are refreshed with each sub-page.
pub const PIXELS_PER_SUBPAGE: usize = NUM_PIXELS / 2;

/// The factory-default bus address.
pub const DEFAULT_ADDRESS: u8 = 0x33;
