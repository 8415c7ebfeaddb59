// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The sensor's memory map.
//!
//! Every 16-bit word the controller can touch falls into one of a few regions, and each region
//! has a fixed [`Access`] mode. Anything outside of those regions is unmapped.
use core::fmt;
use core::ops::RangeInclusive;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A word address in the sensor's memory map.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Address(u16);

impl Address {
    pub const fn new(address: u16) -> Self {
        Self(address)
    }

    /// The big-endian bytes sent on the bus to select this address.
    pub fn as_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// The address `count` words past this one, if it does not overflow.
    pub fn offset(&self, count: usize) -> Option<Self> {
        u16::try_from(count)
            .ok()
            .and_then(|count| self.0.checked_add(count))
            .map(Self)
    }

    /// The access mode of the region containing this address.
    ///
    /// `None` is returned for unmapped addresses.
    pub fn access(&self) -> Option<Access> {
        MEMORY_MAP
            .iter()
            .find(|region| region.range.contains(&self.0))
            .map(|region| region.access)
    }
}

impl From<u16> for Address {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Address> for u16 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// Whether a register may be written by the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::ReadOnly => f.write_str("read-only"),
            Access::ReadWrite => f.write_str("read-write"),
        }
    }
}

struct Region {
    range: RangeInclusive<u16>,
    access: Access,
}

// ROM (0x0000-0x03FF) and the reserved tail of RAM are deliberately absent.
const MEMORY_MAP: [Region; 5] = [
    Region {
        range: (RamAddress::Base as u16)..=(RamAddress::End as u16),
        access: Access::ReadOnly,
    },
    Region {
        range: (EepromAddress::Base as u16)..=(EepromAddress::End as u16),
        access: Access::ReadOnly,
    },
    Region {
        range: RegisterAddress::Status as u16..=RegisterAddress::Status as u16,
        access: Access::ReadWrite,
    },
    Region {
        range: RegisterAddress::Control as u16..=RegisterAddress::Control as u16,
        access: Access::ReadWrite,
    },
    Region {
        range: RegisterAddress::I2cConfig as u16..=RegisterAddress::I2cConfig as u16,
        access: Access::ReadWrite,
    },
];

/// The registers the controller configures the sensor through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum RegisterAddress {
    Status = 0x8000,
    Control = 0x800D,
    I2cConfig = 0x800F,
}

impl From<RegisterAddress> for Address {
    fn from(register: RegisterAddress) -> Self {
        Self(register.into())
    }
}

/// Addresses of the calibration block.
// Discriminants are written out so they can be compared against the datasheet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum EepromAddress {
    Base = 0x2400,

    /// α<sub>PTAT</sub> and the offset scaling exponents.
    OffsetCompensation = 0x2410,

    /// K<sub>V<sub>DD</sub></sub> and V<sub>DD<sub>25</sub></sub>.
    VddConstants = 0x2433,

    /// The first of the 768 per-pixel calibration words.
    PixelCalibrationStart = 0x2440,

    End = 0x273F,
}

impl EepromAddress {
    /// The number of words in the calibration block.
    pub const LENGTH: usize = (EepromAddress::End as usize) - (EepromAddress::Base as usize) + 1;

    /// The index of this address within the calibration block.
    pub const fn index(self) -> usize {
        self as usize - EepromAddress::Base as usize
    }
}

impl From<EepromAddress> for Address {
    fn from(eeprom_address: EepromAddress) -> Self {
        Self(eeprom_address.into())
    }
}

/// Addresses in the sensor's RAM.
///
/// Pixel data starts at `Base` in row-major order. Each sub-page only refreshes the pixels
/// belonging to it; the references below are refreshed for every sub-page.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum RamAddress {
    Base = 0x0400,

    /// V<sub>BE</sub>, one half of the ambient temperature measurement.
    AmbientTemperatureVoltageBe = 0x0700,

    CompensationPixelZero = 0x0708,

    Gain = 0x070A,

    /// V<sub>PTAT</sub>, the other half of the ambient temperature measurement.
    AmbientTemperatureVoltage = 0x0720,

    CompensationPixelOne = 0x0728,

    PixelSupplyVoltage = 0x072A,

    End = 0x073F,
}

impl From<RamAddress> for Address {
    fn from(ram_address: RamAddress) -> Self {
        Self(ram_address.into())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x0000, None)]
    #[case(0x03FF, None)]
    #[case(0x0400, Some(Access::ReadOnly))]
    #[case(0x073F, Some(Access::ReadOnly))]
    #[case(0x0740, None)]
    #[case(0x2400, Some(Access::ReadOnly))]
    #[case(0x273F, Some(Access::ReadOnly))]
    #[case(0x8000, Some(Access::ReadWrite))]
    #[case(0x8001, None)]
    #[case(0x800D, Some(Access::ReadWrite))]
    #[case(0x800F, Some(Access::ReadWrite))]
    fn memory_map(#[case] raw: u16, #[case] expected: Option<Access>) {
        assert_eq!(Address::new(raw).access(), expected);
    }

    #[test]
    fn eeprom_length() {
        assert_eq!(EepromAddress::LENGTH, 832);
        assert_eq!(EepromAddress::PixelCalibrationStart.index(), 64);
    }

    #[test]
    fn offset_overflow() {
        assert_eq!(Address::new(0xFFFF).offset(1), None);
        assert_eq!(Address::new(0x0400).offset(32), Some(Address::new(0x0420)));
    }
}
