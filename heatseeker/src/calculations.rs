// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Raw counts to temperatures, following the MLX90640 datasheet.
#[cfg(not(feature = "std"))]
use num_traits::Float;

use crate::frame::{RawFrame, TemperatureFrame};
use crate::mlx90640::{CalibrationSet, References, BASIC_TEMPERATURE_RANGE, WIDTH};
use crate::register::{Resolution, Subpage};

/// Constant needed a few times for the final pixel temperature calculations.
const KELVINS_TO_CELSIUS: f32 = 273.15;

/// The supply voltage the calibration is referenced to.
const V_DD_0: f32 = 3.3;

/// The ambient temperature the calibration is referenced to.
const T_A_0: f32 = 25.0;

/// How far below the sensor temperature the surroundings are assumed to be.
const REFLECTED_TEMPERATURE_OFFSET: f32 = 8.0;

fn delta_v(calibration: &CalibrationSet, v_dd_pixel: i16) -> f32 {
    (i32::from(v_dd_pixel) - i32::from(calibration.v_dd_25())) as f32
        / f32::from(calibration.k_v_dd())
}

fn v_dd(calibration: &CalibrationSet, resolution_correction: f32, v_dd_pixel: i16) -> f32 {
    (resolution_correction * f32::from(v_dd_pixel) - f32::from(calibration.v_dd_25()))
        / f32::from(calibration.k_v_dd())
        + V_DD_0
}

fn v_ptat_art(calibration: &CalibrationSet, t_a_ptat: i16, t_a_v_be: i16) -> f32 {
    let denominator = f32::from(t_a_ptat) * calibration.alpha_ptat() + f32::from(t_a_v_be);
    f32::from(t_a_ptat) / denominator * 18f32.exp2()
}

fn ambient_temperature(calibration: &CalibrationSet, v_ptat_art: f32, delta_v: f32) -> f32 {
    let numerator =
        v_ptat_art / (1f32 + calibration.k_v_ptat() * delta_v) - calibration.v_ptat_25();
    numerator / calibration.k_t_ptat() + T_A_0
}

/// Values shared by every pixel of one sub-page.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CommonIrData {
    gain: f32,
    v_dd: f32,
    t_a: f32,
}

impl CommonIrData {
    /// `None` if the references would divide by zero.
    fn new(
        calibration: &CalibrationSet,
        resolution_correction: f32,
        references: &References,
    ) -> Option<Self> {
        if references.gain == 0 {
            return None;
        }
        let delta_v = delta_v(calibration, references.v_dd_pixel);
        let v_dd = v_dd(calibration, resolution_correction, references.v_dd_pixel);
        // Labelled V_PTAT in the formulas, but T_a_PTAT in the memory map.
        let v_ptat_art = v_ptat_art(calibration, references.t_a_ptat, references.t_a_v_be);
        let t_a = ambient_temperature(calibration, v_ptat_art, delta_v);
        let gain = calibration.gain() / f32::from(references.gain);
        Some(Self { gain, v_dd, t_a })
    }

    /// A raw reading with gain, offset, supply and ambient drift removed.
    fn pixel_offset(&self, raw: i16, reference_offset: i16, k_v: f32, k_ta: f32) -> f32 {
        f32::from(raw) * self.gain
            - f32::from(reference_offset)
                * (1f32 + k_ta * (self.t_a - T_A_0))
                * (1f32 + k_v * (self.v_dd - V_DD_0))
    }
}

/// Everything needed per sub-page before any pixel is touched.
#[derive(Clone, Copy, Debug)]
struct SubpageTerms {
    common: CommonIrData,

    /// TGC × the compensation pixel's offset, or 0 without gradient compensation.
    compensation_offset: f32,

    /// TGC × α<sub>CP</sub>, or 0 without gradient compensation.
    compensation_alpha: f32,

    /// 1 + K<sub>s<sub>T<sub>a</sub></sub></sub> (T<sub>a</sub> - T<sub>a<sub>0</sub></sub>)
    alpha_coefficient: f32,

    /// T<sub>a-r</sub>, the radiation the pixel sees from its surroundings.
    t_ar: f32,
}

impl SubpageTerms {
    fn new(
        calibration: &CalibrationSet,
        resolution_correction: f32,
        emissivity: f32,
        references: &References,
        subpage: Subpage,
    ) -> Option<Self> {
        let common = CommonIrData::new(calibration, resolution_correction, references)?;
        let (compensation_offset, compensation_alpha) =
            match calibration.temperature_gradient_coefficient() {
                Some(tgc) => {
                    let offset = common.pixel_offset(
                        references.compensation_pixel,
                        calibration.offset_reference_cp(subpage),
                        calibration.k_v_cp(),
                        calibration.k_ta_cp(),
                    );
                    (tgc * offset, tgc * calibration.alpha_cp(subpage))
                }
                None => (0f32, 0f32),
            };
        let alpha_coefficient = 1f32 + calibration.k_s_ta() * (common.t_a - T_A_0);
        let t_r = common.t_a - REFLECTED_TEMPERATURE_OFFSET;
        Some(Self {
            common,
            compensation_offset,
            compensation_alpha,
            alpha_coefficient,
            t_ar: t_ar(common.t_a, t_r, emissivity),
        })
    }
}

fn t_ar(t_a: f32, t_r: f32, emissivity: f32) -> f32 {
    let t_a_k4 = (t_a + KELVINS_TO_CELSIUS).powi(4);
    let t_r_k4 = (t_r + KELVINS_TO_CELSIUS).powi(4);
    t_r_k4 - ((t_r_k4 - t_a_k4) / emissivity)
}

/// The temperature in the basic range, between 0 °C and CT3.
fn per_pixel_temperature(v_ir: f32, alpha: f32, t_ar: f32, k_s_to: f32) -> f32 {
    let s_x = k_s_to * (alpha.powi(3) * v_ir + alpha.powi(4) * t_ar).powf(0.25);
    let t_o_root = (v_ir / (alpha * (1f32 - k_s_to * KELVINS_TO_CELSIUS) + s_x) + t_ar).powf(0.25);
    t_o_root - KELVINS_TO_CELSIUS
}

/// Which calibrated range a temperature falls into.
fn temperature_range(corner_temperatures: &[i16], temperature: f32) -> usize {
    corner_temperatures[1..]
        .iter()
        .take_while(|corner| temperature >= f32::from(**corner))
        .count()
}

/// Redo a basic-range temperature with the sensitivity of the range it actually fell in.
fn extended_range_temperature(
    calibration: &CalibrationSet,
    v_ir: f32,
    alpha: f32,
    t_ar: f32,
    basic_temperature: f32,
) -> f32 {
    let corner_temperatures = calibration.corner_temperatures();
    let range = temperature_range(corner_temperatures, basic_temperature);
    if range == BASIC_TEMPERATURE_RANGE {
        return basic_temperature;
    }
    let sensitivity = alpha
        * calibration.alpha_correction()[range]
        * (1f32
            + calibration.k_s_to()[range]
                * (basic_temperature - f32::from(corner_temperatures[range])));
    (v_ir / sensitivity + t_ar).powf(0.25) - KELVINS_TO_CELSIUS
}

/// Converts assembled raw frames into temperatures.
///
/// Conversion is a pure function of the frame and the calibration. Pixels that cannot be
/// converted (flagged bad in calibration, a zero gain reference, or a non-finite result) are
/// marked invalid instead of failing the whole frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadiometricConverter {
    emissivity: f32,

    /// The ADC resolution the sensor is running at.
    resolution: Resolution,
}

impl Default for RadiometricConverter {
    fn default() -> Self {
        Self::new(1.0, Resolution::default())
    }
}

impl RadiometricConverter {
    pub fn new(emissivity: f32, resolution: Resolution) -> Self {
        Self {
            emissivity,
            resolution,
        }
    }

    pub fn emissivity(&self) -> f32 {
        self.emissivity
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The factor between the calibrated ADC resolution and the running one.
    pub fn resolution_correction(&self, calibration: &CalibrationSet) -> f32 {
        let calibrated = i32::from(calibration.resolution().bits());
        let running = i32::from(self.resolution.bits());
        2f32.powi(calibrated - running)
    }

    /// The ambient temperature reported by one sub-page's references.
    pub fn ambient_temperature(
        &self,
        references: &References,
        calibration: &CalibrationSet,
    ) -> Option<f32> {
        CommonIrData::new(calibration, self.resolution_correction(calibration), references)
            .map(|common| common.t_a)
    }

    pub fn convert(&self, frame: &RawFrame, calibration: &CalibrationSet) -> TemperatureFrame {
        let resolution_correction = self.resolution_correction(calibration);
        let terms = [Subpage::Zero, Subpage::One].map(|subpage| {
            SubpageTerms::new(
                calibration,
                resolution_correction,
                self.emissivity,
                frame.references(subpage),
                subpage,
            )
        });
        let ambient = match terms {
            [Some(zero), Some(one)] => (zero.common.t_a + one.common.t_a) / 2.0,
            [Some(only), None] | [None, Some(only)] => only.common.t_a,
            [None, None] => f32::NAN,
        };
        let k_s_to_basic = calibration.k_s_to()[BASIC_TEMPERATURE_RANGE];
        let mut output = TemperatureFrame::invalid(ambient);
        for (index, raw) in frame.pixels().iter().copied().enumerate() {
            if calibration.is_bad_pixel(index) {
                continue;
            }
            let subpage = frame.pattern().subpage_of(index / WIDTH, index % WIDTH);
            let terms = match &terms[subpage.index()] {
                Some(terms) => terms,
                None => continue,
            };
            let pixel_offset = terms.common.pixel_offset(
                raw,
                calibration.offset_reference_pixel(index),
                calibration.k_v_pixel(index),
                calibration.k_ta_pixel(index),
            );
            let v_ir = pixel_offset / self.emissivity - terms.compensation_offset;
            let alpha = (calibration.alpha_pixel(index) - terms.compensation_alpha)
                * terms.alpha_coefficient;
            let basic = per_pixel_temperature(v_ir, alpha, terms.t_ar, k_s_to_basic);
            let temperature =
                extended_range_temperature(calibration, v_ir, alpha, terms.t_ar, basic);
            output.set_index(index, Some(temperature));
        }
        output
    }
}
