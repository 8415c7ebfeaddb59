// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use arrayvec::ArrayVec;
#[cfg(not(feature = "std"))]
use num_traits::Float;

use crate::error::CalibrationError;
use crate::frame::PixelMask;
use crate::register::{Resolution, Subpage};
use crate::util::WordBuffer;

use super::address::EepromAddress;
use super::{NUM_PIXELS, WIDTH};

/// The number of corner temperatures the sensor is calibrated at.
const NUM_CORNER_TEMPERATURES: usize = 4;

/// The range the basic temperature calculation is valid in, between CT1 and CT2.
pub(crate) const BASIC_TEMPERATURE_RANGE: usize = 1;

/// The most broken or outlier pixels a usable sensor may have.
pub const MAX_BAD_PIXELS: usize = 4;

macro_rules! expose_member {
    ($name:ident, $member_type:ty) => {
        pub fn $name(&self) -> $member_type {
            self.$name
        }
    };
    (&$name:ident, $member_type:ty) => {
        pub fn $name(&self) -> &$member_type {
            &self.$name
        }
    };
}

/// The calibration constants unpacked from the sensor's EEPROM.
///
/// Parsed once at startup with [`CalibrationSet::load`] and never modified afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSet {
    k_v_dd: i16,

    v_dd_25: i16,

    /// The ADC resolution the sensor was calibrated at.
    resolution: Resolution,

    k_v_ptat: f32,

    k_t_ptat: f32,

    v_ptat_25: f32,

    alpha_ptat: f32,

    gain: f32,

    k_s_ta: f32,

    corner_temperatures: [i16; NUM_CORNER_TEMPERATURES],

    k_s_to: [f32; NUM_CORNER_TEMPERATURES],

    alpha_correction: [f32; NUM_CORNER_TEMPERATURES],

    alpha_pixels: [f32; NUM_PIXELS],

    alpha_cp: [f32; 2],

    offset_reference_pixels: [i16; NUM_PIXELS],

    offset_reference_cp: [i16; 2],

    /// K<sub>V</sub> in chessboard order, see [`chessboard_index`].
    k_v_pattern: [f32; 4],

    k_v_cp: f32,

    k_ta_pixels: [f32; NUM_PIXELS],

    k_ta_cp: f32,

    temperature_gradient_coefficient: Option<f32>,

    bad_pixels: PixelMask,
}

/// Index into a four-element table laid out as: even row and even column, odd row and even
/// column, even row and odd column, odd row and odd column.
///
/// Rows and columns are 0-indexed, so even and odd are swapped compared to the datasheet.
fn chessboard_index(row: usize, column: usize) -> usize {
    (row % 2) + 2 * (column % 2)
}

/// Spread the row and column adjustments over a grid starting from a shared average.
///
/// The buffer must be at the word holding the row, column and remainder scales, which is followed
/// by the average. The grid, the remainder scale and the 4-bit value packed in front of the scales
/// are returned.
fn bulk_pixel_calibration(buf: &mut &[u16], signed_average: bool) -> ([i32; NUM_PIXELS], u8, u8) {
    let [extra_value, row_scale, column_scale, remainder_scale] = buf.get_u4s();
    let average = if signed_average {
        i32::from(buf.get_i16())
    } else {
        i32::from(buf.get_u16())
    };
    let mut grid = [average; NUM_PIXELS];
    const VALUES_PER_WORD: usize = 4;
    // Each word covers four rows, stored backwards.
    for rows in grid.chunks_exact_mut(WIDTH * VALUES_PER_WORD) {
        let coefficients = buf.get_i4s();
        for (row, coefficient) in rows.chunks_exact_mut(WIDTH).zip(coefficients.iter().rev()) {
            let adjustment = i32::from(*coefficient) << row_scale;
            row.iter_mut().for_each(|pixel| *pixel += adjustment);
        }
    }
    for column_group in 0..(WIDTH / VALUES_PER_WORD) {
        let coefficients = buf.get_i4s();
        let first_column = column_group * VALUES_PER_WORD;
        for row in grid.chunks_exact_mut(WIDTH) {
            row[first_column..(first_column + VALUES_PER_WORD)]
                .iter_mut()
                .zip(coefficients.iter().rev())
                .for_each(|(pixel, coefficient)| *pixel += i32::from(*coefficient) << column_scale);
        }
    }
    (grid, remainder_scale, extra_value)
}

/// The sensitivity correction for each temperature range, relative to the basic range.
fn alpha_correction_coefficients(
    corner_temperatures: &[i16; NUM_CORNER_TEMPERATURES],
    k_s_to: &[f32; NUM_CORNER_TEMPERATURES],
) -> [f32; NUM_CORNER_TEMPERATURES] {
    let mut corrections = [1f32; NUM_CORNER_TEMPERATURES];
    (0..NUM_CORNER_TEMPERATURES).for_each(|range| {
        corrections[range] = alpha_corr_n(range, corner_temperatures, k_s_to)
    });
    corrections
}

fn alpha_corr_n(n: usize, ct: &[i16], k_s_to: &[f32]) -> f32 {
    match n.cmp(&BASIC_TEMPERATURE_RANGE) {
        core::cmp::Ordering::Equal => 1f32,
        core::cmp::Ordering::Less => {
            (1f32 + k_s_to[n] * f32::from(ct[n + 1] - ct[n])).recip()
                * alpha_corr_n(n + 1, ct, k_s_to)
        }
        core::cmp::Ordering::Greater => {
            (1f32 + k_s_to[n - 1] * f32::from(ct[n] - ct[n - 1])) * alpha_corr_n(n - 1, ct, k_s_to)
        }
    }
}

/// Check the bad pixels against the datasheet's limits: at most [`MAX_BAD_PIXELS`], and no two
/// touching (diagonals included).
fn check_bad_pixels(bad_pixels: &PixelMask) -> Result<(), CalibrationError> {
    let count = bad_pixels.count_ones();
    if count > MAX_BAD_PIXELS {
        return Err(CalibrationError::TooManyBadPixels {
            count,
            limit: MAX_BAD_PIXELS,
        });
    }
    let indices: ArrayVec<usize, MAX_BAD_PIXELS> = bad_pixels.iter_ones().collect();
    for (position, first) in indices.iter().enumerate() {
        for second in &indices[(position + 1)..] {
            let row_distance = (first / WIDTH).abs_diff(second / WIDTH);
            let column_distance = (first % WIDTH).abs_diff(second % WIDTH);
            if row_distance <= 1 && column_distance <= 1 {
                return Err(CalibrationError::AdjacentBadPixels {
                    first: *first,
                    second: *second,
                });
            }
        }
    }
    Ok(())
}

impl CalibrationSet {
    /// Unpack the calibration constants from a dump of the whole EEPROM.
    ///
    /// Blocks of the wrong size, zero divisors, out of range offsets and bad pixel layouts the
    /// datasheet deems unusable are all rejected.
    pub fn load(words: &[u16]) -> Result<Self, CalibrationError> {
        if words.len() != EepromAddress::LENGTH {
            return Err(CalibrationError::Truncated {
                expected: EepromAddress::LENGTH,
                found: words.len(),
            });
        }
        let mut buf = &words[EepromAddress::OffsetCompensation.index()..];
        let (offsets, offset_remainder_scale, alpha_ptat) = bulk_pixel_calibration(&mut buf, true);
        let alpha_ptat = f32::from(alpha_ptat) / 4.0 + 8.0;
        // The sensitivity reference is unsigned.
        let (mut alphas, alpha_remainder_scale, alpha_scale_exp) =
            bulk_pixel_calibration(&mut buf, false);
        // The pixel alpha scale has 30 added to it, the compensation pixel one 27.
        let alpha_scale = f32::from(alpha_scale_exp + 30).exp2();
        let gain = buf.get_i16();
        if gain == 0 {
            return Err(CalibrationError::ZeroCoefficient("gain"));
        }
        let v_ptat_25 = buf.get_i16();
        let (k_v_ptat, k_t_ptat) = buf.get_6_10();
        // k_v_ptat is scaled by 2^12, k_t_ptat by 2^3
        let k_v_ptat = f32::from(k_v_ptat) / 4096.0;
        let k_t_ptat = crate::util::sign_extend(k_t_ptat, 10);
        if k_t_ptat == 0 {
            return Err(CalibrationError::ZeroCoefficient("k_t_ptat"));
        }
        let k_t_ptat = f32::from(k_t_ptat) / 8.0;
        let [k_v_dd, v_dd_25] = buf.get_i8_pair();
        if k_v_dd == 0 {
            return Err(CalibrationError::ZeroCoefficient("k_v_dd"));
        }
        let k_v_dd = i16::from(k_v_dd) << 5;
        // Stored unsigned, then immediately sent negative.
        let v_dd_25 = (i16::from(v_dd_25 as u8) - 256) * (1 << 5) - (1 << 13);
        let k_v_average = buf.get_i4s();
        // Interleaved mode offset compensation, not applied
        buf.advance(1);
        let [k_ta_ee, k_ta_oe] = buf.get_i8_pair();
        let [k_ta_eo, k_ta_oo] = buf.get_i8_pair();
        let k_ta_pattern = [k_ta_ee, k_ta_oe, k_ta_eo, k_ta_oo];
        let [resolution, k_v_scale, k_ta_scale1, k_ta_scale2] = buf.get_u4s();
        // The other two bits are reserved.
        let resolution = Resolution::try_from(resolution & 0x3)
            .map_err(|_| CalibrationError::OutOfRange("resolution"))?;
        let k_v_scale = f32::from(k_v_scale).exp2();
        let k_ta_scale1 = f32::from(k_ta_scale1 + 8).exp2();
        let k_v_pattern = k_v_average.map(|k_v| f32::from(k_v) / k_v_scale);
        let alpha_cp = {
            let (ratio, alpha_cp0) = buf.get_6_10();
            let ratio = f32::from(ratio) / 128.0;
            let alpha_cp0 = f32::from(alpha_cp0) / f32::from(alpha_scale_exp + 27).exp2();
            [alpha_cp0, alpha_cp0 * (1.0 + ratio)]
        };
        let offset_reference_cp = {
            let (delta, offset_cp0) = buf.get_6_10();
            let offset_cp0 = crate::util::sign_extend(offset_cp0, 10);
            [offset_cp0, offset_cp0 + i16::from(delta)]
        };
        let [k_v_cp, k_ta_cp] = buf.get_i8_pair();
        let k_v_cp = f32::from(k_v_cp) / k_v_scale;
        let k_ta_cp = f32::from(k_ta_cp) / k_ta_scale1;
        let [k_s_ta, tgc] = buf.get_i8_pair();
        let k_s_ta = f32::from(k_s_ta) / 8192.0;
        let temperature_gradient_coefficient = match tgc {
            0 => None,
            tgc => Some(f32::from(tgc) / 32.0),
        };
        // Each word holds the higher range in the high byte.
        let [k_s_to_1, k_s_to_0] = buf.get_i8_pair();
        let [k_s_to_3, k_s_to_2] = buf.get_i8_pair();
        let [step, ct3, ct2, k_s_to_scale] = buf.get_u4s();
        // The top two bits of the step are reserved, and the step is in units of 10 °C.
        let step = i16::from(step & 0x3) * 10;
        let ct2 = i16::from(ct2) * step;
        let ct3 = i16::from(ct3) * step + ct2;
        if !(0 < ct2 && ct2 < ct3) {
            return Err(CalibrationError::OutOfRange("corner temperatures"));
        }
        // CT1 and CT2 in the datasheet are fixed at -40 and 0.
        let corner_temperatures = [-40i16, 0, ct2, ct3];
        let k_s_to_scale = f32::from(k_s_to_scale + 8).exp2();
        let k_s_to = [k_s_to_0, k_s_to_1, k_s_to_2, k_s_to_3].map(|k| f32::from(k) / k_s_to_scale);
        let alpha_correction = alpha_correction_coefficients(&corner_temperatures, &k_s_to);

        let mut offset_reference_pixels = [0i16; NUM_PIXELS];
        let mut alpha_pixels = [0f32; NUM_PIXELS];
        let mut k_ta_pixels = [0f32; NUM_PIXELS];
        let mut bad_pixels = PixelMask::ZERO;
        let pixel_words = &words[EepromAddress::PixelCalibrationStart.index()..];
        for (index, word) in pixel_words.iter().copied().enumerate() {
            let row = index / WIDTH;
            let column = index % WIDTH;
            // Broken pixels read as all zeros, outliers have the lowest bit set.
            if word == 0 || word & 0x1 != 0 {
                bad_pixels.set(index, true);
            }
            let signed = word as i16;
            let offset_remainder = i32::from(signed >> 10);
            let offset = offsets[index] + (offset_remainder << offset_remainder_scale);
            offset_reference_pixels[index] =
                i16::try_from(offset).map_err(|_| CalibrationError::OutOfRange("pixel offset"))?;
            let alpha_remainder = i32::from((signed << 6) >> 10);
            alphas[index] += alpha_remainder << alpha_remainder_scale;
            alpha_pixels[index] = alphas[index] as f32 / alpha_scale;
            let k_ta_remainder = i32::from((signed << 12) >> 13);
            let k_ta_numerator = i32::from(k_ta_pattern[chessboard_index(row, column)])
                + (k_ta_remainder << k_ta_scale2);
            k_ta_pixels[index] = k_ta_numerator as f32 / k_ta_scale1;
        }
        check_bad_pixels(&bad_pixels)?;
        Ok(Self {
            k_v_dd,
            v_dd_25,
            resolution,
            k_v_ptat,
            k_t_ptat,
            v_ptat_25: f32::from(v_ptat_25),
            alpha_ptat,
            gain: f32::from(gain),
            k_s_ta,
            corner_temperatures,
            k_s_to,
            alpha_correction,
            alpha_pixels,
            alpha_cp,
            offset_reference_pixels,
            offset_reference_cp,
            k_v_pattern,
            k_v_cp,
            k_ta_pixels,
            k_ta_cp,
            temperature_gradient_coefficient,
            bad_pixels,
        })
    }

    expose_member!(k_v_dd, i16);
    expose_member!(v_dd_25, i16);
    expose_member!(resolution, Resolution);
    expose_member!(k_v_ptat, f32);
    expose_member!(k_t_ptat, f32);
    expose_member!(v_ptat_25, f32);
    expose_member!(alpha_ptat, f32);
    expose_member!(gain, f32);
    expose_member!(k_s_ta, f32);
    expose_member!(&corner_temperatures, [i16; NUM_CORNER_TEMPERATURES]);
    expose_member!(&k_s_to, [f32; NUM_CORNER_TEMPERATURES]);
    expose_member!(&alpha_correction, [f32; NUM_CORNER_TEMPERATURES]);
    expose_member!(k_v_cp, f32);
    expose_member!(k_ta_cp, f32);
    expose_member!(temperature_gradient_coefficient, Option<f32>);

    /// Sensitivity of the pixel at `index`, row-major.
    pub fn alpha_pixel(&self, index: usize) -> f32 {
        self.alpha_pixels[index]
    }

    pub fn offset_reference_pixel(&self, index: usize) -> i16 {
        self.offset_reference_pixels[index]
    }

    pub fn k_ta_pixel(&self, index: usize) -> f32 {
        self.k_ta_pixels[index]
    }

    pub fn k_v_pixel(&self, index: usize) -> f32 {
        self.k_v_pattern[chessboard_index(index / WIDTH, index % WIDTH)]
    }

    pub fn alpha_cp(&self, subpage: Subpage) -> f32 {
        self.alpha_cp[subpage.index()]
    }

    pub fn offset_reference_cp(&self, subpage: Subpage) -> i16 {
        self.offset_reference_cp[subpage.index()]
    }

    /// Whether the pixel at `index` is broken or an outlier and should not be used.
    pub fn is_bad_pixel(&self, index: usize) -> bool {
        self.bad_pixels[index]
    }

    pub fn bad_pixels(&self) -> &PixelMask {
        &self.bad_pixels
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use heatseeker_test_data::datasheet_eeprom;
    use rstest::rstest;

    use super::*;

    /// Pixel (12, 16) in the datasheet's 1-indexed worked example.
    const EXAMPLE_PIXEL: usize = 11 * WIDTH + 15;

    fn datasheet_calibration() -> CalibrationSet {
        CalibrationSet::load(&datasheet_eeprom()).unwrap()
    }

    #[test]
    fn shared_constants() {
        let calibration = datasheet_calibration();
        assert_eq!(calibration.k_v_dd(), -3168);
        assert_eq!(calibration.v_dd_25(), -13056);
        assert_eq!(calibration.resolution(), Resolution::Eighteen);
        assert_approx_eq!(f32, calibration.k_v_ptat(), 0.005371094);
        assert_approx_eq!(f32, calibration.k_t_ptat(), 42.25);
        assert_approx_eq!(f32, calibration.v_ptat_25(), 12273.0);
        assert_approx_eq!(f32, calibration.alpha_ptat(), 9.0);
        assert_approx_eq!(f32, calibration.gain(), 6383.0);
        assert_approx_eq!(f32, calibration.k_s_ta(), -0.001953125);
        assert_eq!(calibration.temperature_gradient_coefficient(), Some(1.0));
    }

    #[test]
    fn corner_temperatures() {
        let calibration = datasheet_calibration();
        assert_eq!(calibration.corner_temperatures(), &[-40, 0, 160, 320]);
        assert_approx_eq!(f32, calibration.k_s_to()[1], -0.00080108642578125);
        let alpha_correction = calibration.alpha_correction();
        assert_approx_eq!(f32, alpha_correction[1], 1.0);
        assert_approx_eq!(
            f32,
            alpha_correction[2],
            1.0 + calibration.k_s_to()[1] * 160.0
        );
    }

    #[rstest]
    #[case::zero_step(0xCFFF)]
    #[case::zero_ct2(0xFF0F)]
    #[case::zero_ct3(0xF0FF)]
    fn degenerate_corner_temperatures(#[case] mask: u16) {
        let mut eeprom = datasheet_eeprom();
        eeprom[0x3F] &= mask;
        assert_eq!(
            CalibrationSet::load(&eeprom),
            Err(CalibrationError::OutOfRange("corner temperatures"))
        );
    }

    #[test]
    fn compensation_pixel() {
        let calibration = datasheet_calibration();
        assert_approx_eq!(
            f32,
            calibration.alpha_cp(Subpage::Zero),
            4.07453626394272e-9,
            epsilon = 1e-15
        );
        assert_approx_eq!(
            f32,
            calibration.alpha_cp(Subpage::One),
            3.851710062008351e-9,
            epsilon = 1e-15
        );
        assert_eq!(calibration.offset_reference_cp(Subpage::Zero), -75);
        assert_eq!(calibration.offset_reference_cp(Subpage::One), -77);
        assert_approx_eq!(f32, calibration.k_v_cp(), 0.5);
        assert_approx_eq!(f32, calibration.k_ta_cp(), 0.00457763671875);
    }

    #[test]
    fn example_pixel() {
        let calibration = datasheet_calibration();
        assert_eq!(calibration.offset_reference_pixel(EXAMPLE_PIXEL), -75);
        assert_approx_eq!(
            f32,
            calibration.alpha_pixel(EXAMPLE_PIXEL),
            1.262233122690854e-7,
            epsilon = 1e-13
        );
        assert_approx_eq!(f32, calibration.k_v_pixel(EXAMPLE_PIXEL), 0.5);
        assert_approx_eq!(
            f32,
            calibration.k_ta_pixel(EXAMPLE_PIXEL),
            0.005126953125,
            epsilon = 1e-9
        );
        assert_eq!(calibration.bad_pixels().count_ones(), 0);
    }

    #[test]
    fn truncated_block() {
        let eeprom = datasheet_eeprom();
        assert_eq!(
            CalibrationSet::load(&eeprom[..100]),
            Err(CalibrationError::Truncated {
                expected: 832,
                found: 100
            })
        );
    }

    #[test]
    fn zero_gain() {
        let mut eeprom = datasheet_eeprom();
        eeprom[0x30] = 0;
        assert_eq!(
            CalibrationSet::load(&eeprom),
            Err(CalibrationError::ZeroCoefficient("gain"))
        );
    }

    #[test]
    fn tolerated_bad_pixels() {
        let mut eeprom = datasheet_eeprom();
        let pixel_start = EepromAddress::PixelCalibrationStart.index();
        eeprom[pixel_start] = 0;
        eeprom[pixel_start + 100] |= 0x1;
        let calibration = CalibrationSet::load(&eeprom).unwrap();
        assert!(calibration.is_bad_pixel(0));
        assert!(calibration.is_bad_pixel(100));
        assert!(!calibration.is_bad_pixel(1));
    }

    #[test]
    fn too_many_bad_pixels() {
        let mut eeprom = datasheet_eeprom();
        let pixel_start = EepromAddress::PixelCalibrationStart.index();
        for index in [0, 10, 100, 200, 300] {
            eeprom[pixel_start + index] = 0;
        }
        assert_eq!(
            CalibrationSet::load(&eeprom),
            Err(CalibrationError::TooManyBadPixels { count: 5, limit: 4 })
        );
    }

    #[test]
    fn adjacent_bad_pixels() {
        let mut eeprom = datasheet_eeprom();
        let pixel_start = EepromAddress::PixelCalibrationStart.index();
        // Diagonal neighbours
        eeprom[pixel_start + 40] = 0;
        eeprom[pixel_start + 40 + WIDTH + 1] = 0;
        assert_eq!(
            CalibrationSet::load(&eeprom),
            Err(CalibrationError::AdjacentBadPixels {
                first: 40,
                second: 73
            })
        );
    }
}
