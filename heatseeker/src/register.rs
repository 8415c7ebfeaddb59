// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Typed views of the sensor's configuration registers.
use core::convert::TryFrom;
use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mlx90640::RegisterAddress;
use crate::util::is_bit_set;

/// Trait for common register functionality.
pub trait Register: Copy + From<u16> + Into<u16> {
    /// A bit mask of which bits can be modified by the controller.
    ///
    /// When changing register values on the sensor, the current value should be read, then
    /// bitwise-ANDed with the complement of this mask, then bitwise-ORed with the new value. This
    /// preserves the values of any reserved bits in the registers.
    const WRITE_MASK: u16;

    /// Where this register lives in the memory map.
    const ADDRESS: RegisterAddress;

    /// Merge the writable bits of `self` into a word read from the sensor.
    fn merge_into(self, current: u16) -> u16 {
        (current & !Self::WRITE_MASK) | (self.into() & Self::WRITE_MASK)
    }
}

/// The status register (0x8000).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusRegister {
    /// The sub-page which was last updated by the sensor. Read-only.
    last_updated_subpage: Subpage,

    /// Set by the sensor when new data is available in RAM; only the controller clears it.
    new_data: bool,

    /// Whether data in RAM can be overwritten.
    overwrite_enabled: bool,
}

impl StatusRegister {
    pub fn last_updated_subpage(&self) -> Subpage {
        self.last_updated_subpage
    }

    pub fn new_data(&self) -> bool {
        self.new_data
    }

    /// The sub-page that is waiting to be read, if any.
    pub fn ready_subpage(&self) -> Option<Subpage> {
        self.new_data.then(|| self.last_updated_subpage)
    }

    /// Acknowledge the current data, letting the sensor publish the next sub-page.
    pub fn reset_new_data(&mut self) {
        self.new_data = false;
    }

    pub fn overwrite_enabled(&self) -> bool {
        self.overwrite_enabled
    }
}

impl Register for StatusRegister {
    // The three least significant bits are read-only. Bit 5 (start measurement) is only used
    // in step mode, which this crate never enables.
    const WRITE_MASK: u16 = 0x0018;
    const ADDRESS: RegisterAddress = RegisterAddress::Status;
}

impl From<u16> for StatusRegister {
    fn from(raw: u16) -> Self {
        // Only the first bit is used, the other two bits are reserved.
        let last_updated_subpage = if is_bit_set(raw, 0) {
            Subpage::One
        } else {
            Subpage::Zero
        };
        Self {
            last_updated_subpage,
            new_data: is_bit_set(raw, 3),
            overwrite_enabled: is_bit_set(raw, 4),
        }
    }
}

impl From<StatusRegister> for u16 {
    fn from(status: StatusRegister) -> Self {
        status.last_updated_subpage as u16
            | (status.new_data as u16) << 3
            | (status.overwrite_enabled as u16) << 4
    }
}

/// The control register (0x800D).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControlRegister {
    /// Whether or not to use sub-pages. Must stay enabled for two-part acquisition.
    use_subpages: bool,

    /// Only transfer data into RAM when `StatusRegister::overwrite_enabled` is set.
    data_hold: bool,

    /// Keep measuring the same sub-page instead of alternating.
    subpage_repeat: bool,

    frame_rate: FrameRate,

    resolution: Resolution,

    reorder_pattern: ReorderPattern,
}

impl ControlRegister {
    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn set_frame_rate(&mut self, frame_rate: FrameRate) {
        self.frame_rate = frame_rate;
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    pub fn reorder_pattern(&self) -> ReorderPattern {
        self.reorder_pattern
    }

    pub fn set_reorder_pattern(&mut self, reorder_pattern: ReorderPattern) {
        self.reorder_pattern = reorder_pattern;
    }

    pub fn use_subpages(&self) -> bool {
        self.use_subpages
    }

    pub fn set_use_subpages(&mut self, use_subpages: bool) {
        self.use_subpages = use_subpages;
    }

    pub fn subpage_repeat(&self) -> bool {
        self.subpage_repeat
    }

    pub fn set_subpage_repeat(&mut self, subpage_repeat: bool) {
        self.subpage_repeat = subpage_repeat;
    }
}

impl Default for ControlRegister {
    /// The power-on settings documented in the datasheet.
    fn default() -> Self {
        Self {
            use_subpages: true,
            data_hold: false,
            subpage_repeat: false,
            frame_rate: FrameRate::default(),
            resolution: Resolution::default(),
            reorder_pattern: ReorderPattern::Chess,
        }
    }
}

impl Register for ControlRegister {
    // Bit 1 (step mode) and bit 4 (sub-page select for repeat mode) are left untouched.
    const WRITE_MASK: u16 = 0x1F8D;
    const ADDRESS: RegisterAddress = RegisterAddress::Control;
}

impl From<u16> for ControlRegister {
    fn from(raw: u16) -> Self {
        // Both conversions are infallible: every 3-bit and 2-bit code has a variant.
        let frame_rate = FrameRate::try_from(((raw & 0x0380) >> 7) as u8).unwrap_or_default();
        let resolution = Resolution::try_from(((raw & 0x0C00) >> 10) as u8).unwrap_or_default();
        let reorder_pattern = if is_bit_set(raw, 12) {
            ReorderPattern::Chess
        } else {
            ReorderPattern::Interleave
        };
        Self {
            use_subpages: is_bit_set(raw, 0),
            data_hold: is_bit_set(raw, 2),
            subpage_repeat: is_bit_set(raw, 3),
            frame_rate,
            resolution,
            reorder_pattern,
        }
    }
}

impl From<ControlRegister> for u16 {
    fn from(register: ControlRegister) -> Self {
        register.use_subpages as u16
            | (register.data_hold as u16) << 2
            | (register.subpage_repeat as u16) << 3
            | u16::from(u8::from(register.frame_rate)) << 7
            | u16::from(u8::from(register.resolution)) << 10
            | (register.reorder_pattern as u16) << 12
    }
}

/// One of the two halves of a frame.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Subpage {
    Zero = 0,
    One = 1,
}

impl Subpage {
    /// The sub-page acquired after this one.
    pub fn next(self) -> Self {
        match self {
            Subpage::Zero => Subpage::One,
            Subpage::One => Subpage::Zero,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Subpage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// The sensor's refresh rate, in sub-pages per second.
///
/// Before using the higher rates, make sure the bus is fast enough: roughly 4 Hz at 100 kHz,
/// 16 Hz at 400 kHz, and 32 Hz (64 Hz barely) at 1 MHz.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FrameRate {
    Half = 0,
    One = 1,
    Two = 2,
    Four = 3,
    Eight = 4,
    Sixteen = 5,
    ThirtyTwo = 6,
    SixtyFour = 7,
}

impl FrameRate {
    const ALL: [FrameRate; 8] = [
        FrameRate::Half,
        FrameRate::One,
        FrameRate::Two,
        FrameRate::Four,
        FrameRate::Eight,
        FrameRate::Sixteen,
        FrameRate::ThirtyTwo,
        FrameRate::SixtyFour,
    ];

    /// The supported rate closest to `hz`. Ties go to the slower rate.
    pub fn nearest(hz: f32) -> Self {
        let distance = |rate: FrameRate| {
            let d = f32::from(rate) - hz;
            if d < 0.0 {
                -d
            } else {
                d
            }
        };
        Self::ALL
            .iter()
            .copied()
            .fold(FrameRate::Half, |best, rate| {
                if distance(rate) < distance(best) {
                    rate
                } else {
                    best
                }
            })
    }

    /// How long the sensor takes to refresh one sub-page, in milliseconds.
    pub fn subpage_period_ms(self) -> u32 {
        // Code n is 2^(n-1) Hz
        2000 >> u8::from(self)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::Two
    }
}

impl TryFrom<f32> for FrameRate {
    type Error = ConfigError;

    /// Only exact rates are accepted; see [`FrameRate::nearest`] for rounding.
    #[allow(clippy::float_cmp)]
    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|rate| f32::from(*rate) == value)
            .ok_or(ConfigError::OutOfRange("frame_rate"))
    }
}

impl From<FrameRate> for f32 {
    fn from(frame_rate: FrameRate) -> Self {
        match frame_rate {
            FrameRate::Half => 0.5,
            rate => (1u32 << (u8::from(rate) - 1)) as f32,
        }
    }
}

/// The resolution of the sensor's ADC.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Resolution {
    Sixteen = 0,
    Seventeen = 1,
    Eighteen = 2,
    Nineteen = 3,
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Eighteen
    }
}

impl Resolution {
    /// The ADC width in bits.
    pub fn bits(self) -> u8 {
        u8::from(self) + 16
    }
}

/// How the two sub-pages interleave into one frame.
///
/// The active pattern is set in the control register and must match how frames are assembled,
/// otherwise the assembled image is scrambled.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ReorderPattern {
    /// Pixels alternate sub-pages along both axes, like a chess board. Sub-page 0 holds the
    /// cells where `row + column` is even.
    ///
    /// This is the power-on default and the mode the sensor is calibrated in.
    Chess = 1,

    /// Whole rows alternate sub-pages. Sub-page 0 holds the even rows. The datasheet also calls
    /// this "TV" mode.
    Interleave = 0,
}

impl Default for ReorderPattern {
    fn default() -> Self {
        Self::Chess
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    macro_rules! assert_register_field {
        ($register:ty, $value:literal, $field:ident, $expected:expr) => {
            let value: u16 = $value;
            let packed = <$register>::from(value);
            assert_eq!(packed.$field(), $expected);
            let unpacked: u16 = packed.into();
            assert_eq!(unpacked, value);
        };
    }

    #[test]
    fn status_register_last_updated_subpage() {
        assert_register_field!(StatusRegister, 0x0001, last_updated_subpage, Subpage::One);
        assert_register_field!(StatusRegister, 0x0000, last_updated_subpage, Subpage::Zero);
    }

    #[test]
    fn status_register_new_data() {
        assert_register_field!(StatusRegister, 0x0008, new_data, true);
        assert_register_field!(StatusRegister, 0x0000, new_data, false);
        assert_eq!(StatusRegister::from(0x0009).ready_subpage(), Some(Subpage::One));
        assert_eq!(StatusRegister::from(0x0001).ready_subpage(), None);
    }

    #[test]
    fn status_register_overwrite() {
        assert_register_field!(StatusRegister, 0x0010, overwrite_enabled, true);
        assert_register_field!(StatusRegister, 0x0000, overwrite_enabled, false);
    }

    #[test]
    fn status_register_acknowledge_preserves_reserved_bits() {
        let current = 0x0029u16;
        let mut status = StatusRegister::from(current);
        status.reset_new_data();
        // new_data cleared, read-only sub-page and reserved bit 5 untouched
        assert_eq!(status.merge_into(current), 0x0021);
    }

    #[test]
    fn control_register_subpages() {
        assert_register_field!(ControlRegister, 0x0001, use_subpages, true);
        assert_register_field!(ControlRegister, 0x0008, subpage_repeat, true);
    }

    #[rstest]
    #[case(0x0000, FrameRate::Half)]
    #[case(0x0080, FrameRate::One)]
    #[case(0x0100, FrameRate::Two)]
    #[case(0x0180, FrameRate::Four)]
    #[case(0x0200, FrameRate::Eight)]
    #[case(0x0280, FrameRate::Sixteen)]
    #[case(0x0300, FrameRate::ThirtyTwo)]
    #[case(0x0380, FrameRate::SixtyFour)]
    fn control_register_frame_rate(#[case] raw: u16, #[case] expected: FrameRate) {
        let register = ControlRegister::from(raw);
        assert_eq!(register.frame_rate(), expected);
        assert_eq!(u16::from(register), raw);
    }

    #[test]
    fn control_register_resolution() {
        assert_register_field!(ControlRegister, 0x0000, resolution, Resolution::Sixteen);
        assert_register_field!(ControlRegister, 0x0400, resolution, Resolution::Seventeen);
        assert_register_field!(ControlRegister, 0x0800, resolution, Resolution::Eighteen);
        assert_register_field!(ControlRegister, 0x0C00, resolution, Resolution::Nineteen);
    }

    #[test]
    fn control_register_reorder_pattern() {
        assert_register_field!(
            ControlRegister,
            0x0000,
            reorder_pattern,
            ReorderPattern::Interleave
        );
        assert_register_field!(ControlRegister, 0x1000, reorder_pattern, ReorderPattern::Chess);
    }

    #[test]
    fn control_register_default_matches_datasheet() {
        assert_eq!(u16::from(ControlRegister::default()), 0x1901);
    }

    #[test]
    fn control_register_merge_keeps_step_mode() {
        let mut register = ControlRegister::from(0x1903);
        register.set_frame_rate(FrameRate::Sixteen);
        assert_eq!(register.merge_into(0x1903), 0x1A83);
    }

    #[rstest]
    #[case(0.5, FrameRate::Half)]
    #[case(1.0, FrameRate::One)]
    #[case(16.0, FrameRate::Sixteen)]
    #[case(64.0, FrameRate::SixtyFour)]
    fn frame_rate_exact(#[case] hz: f32, #[case] expected: FrameRate) {
        assert_eq!(FrameRate::try_from(hz), Ok(expected));
        assert_eq!(f32::from(expected), hz);
    }

    #[test]
    fn frame_rate_inexact() {
        assert!(FrameRate::try_from(0.5000001f32).is_err());
        assert_eq!(FrameRate::nearest(0.0), FrameRate::Half);
        assert_eq!(FrameRate::nearest(5.0), FrameRate::Four);
        assert_eq!(FrameRate::nearest(6.0), FrameRate::Four);
        assert_eq!(FrameRate::nearest(7.0), FrameRate::Eight);
        assert_eq!(FrameRate::nearest(1000.0), FrameRate::SixtyFour);
    }

    #[test]
    fn frame_rate_period() {
        assert_eq!(FrameRate::Half.subpage_period_ms(), 2000);
        assert_eq!(FrameRate::Two.subpage_period_ms(), 500);
        assert_eq!(FrameRate::SixtyFour.subpage_period_ms(), 15);
    }

    #[test]
    fn subpage_next() {
        assert_eq!(Subpage::Zero.next(), Subpage::One);
        assert_eq!(Subpage::One.next(), Subpage::Zero);
    }
}
