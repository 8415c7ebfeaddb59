// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use embedded_hal::blocking::i2c;

use crate::bus::{BusError, RegisterBus};
use crate::clock::Clock;
use crate::register::Subpage;

use super::address::RamAddress;

/// The non-pixel readings captured alongside each sub-page.
///
/// These feed the supply voltage, ambient temperature and gain drift compensation for the
/// pixels of the same sub-page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct References {
    /// V<sub>BE</sub>.
    pub t_a_v_be: i16,

    /// V<sub>PTAT</sub>.
    pub t_a_ptat: i16,

    /// V<sub>DD<sub>pix</sub></sub>.
    pub v_dd_pixel: i16,

    pub gain: i16,

    /// The compensation pixel for the sub-page the references were read with.
    pub compensation_pixel: i16,
}

impl References {
    /// Read the references for `subpage` off of the sensor's RAM.
    pub fn read<I2C, C>(
        bus: &mut RegisterBus<I2C, C>,
        subpage: Subpage,
    ) -> Result<Self, BusError<I2C>>
    where
        I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
        C: Clock,
    {
        let compensation_pixel = match subpage {
            Subpage::Zero => RamAddress::CompensationPixelZero,
            Subpage::One => RamAddress::CompensationPixelOne,
        };
        let mut read = |address: RamAddress| bus.read(address.into()).map(|word| word as i16);
        Ok(Self {
            t_a_v_be: read(RamAddress::AmbientTemperatureVoltageBe)?,
            t_a_ptat: read(RamAddress::AmbientTemperatureVoltage)?,
            v_dd_pixel: read(RamAddress::PixelSupplyVoltage)?,
            gain: read(RamAddress::Gain)?,
            compensation_pixel: read(compensation_pixel)?,
        })
    }
}
