// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Reducing a temperature frame to a single point to aim at.
use crate::config::HotspotConfig;
use crate::frame::TemperatureFrame;

/// The hottest valid pixel of a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hotspot {
    pub row: usize,
    pub column: usize,

    /// In °C.
    pub temperature: f32,
}

/// The outcome of searching a frame.
///
/// A target is only worth aiming at when [`is_valid`][Target::is_valid]; the hottest pixel is
/// kept either way so a weak signal can still be reported.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Target {
    hottest: Option<Hotspot>,
    valid: bool,
}

impl Target {
    /// Nothing was found.
    pub const fn none() -> Self {
        Self {
            hottest: None,
            valid: false,
        }
    }

    /// A target that is worth aiming at.
    pub const fn locked(hotspot: Hotspot) -> Self {
        Self {
            hottest: Some(hotspot),
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Where to aim as `(row, column)`, only for valid targets.
    pub fn location(&self) -> Option<(usize, usize)> {
        self.valid
            .then(|| self.hottest)
            .flatten()
            .map(|hotspot| (hotspot.row, hotspot.column))
    }

    /// The hottest valid pixel, even when it did not qualify as a target.
    pub fn hottest(&self) -> Option<Hotspot> {
        self.hottest
    }
}

/// Finds the hottest valid pixel in a frame, and decides if it is significant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HotspotLocator {
    min_valid_pixels: usize,

    /// The coldest a hotspot may be, in °C.
    threshold: f32,
}

impl HotspotLocator {
    pub fn new(config: &HotspotConfig) -> Self {
        Self {
            min_valid_pixels: config.min_valid_pixels,
            threshold: config.threshold,
        }
    }

    /// Scan every valid pixel in row-major order.
    ///
    /// When several pixels share the maximum, the first one scanned wins. Frames with fewer valid
    /// pixels than the configured minimum, or whose maximum is below the threshold, produce an
    /// invalid target.
    pub fn locate(&self, frame: &TemperatureFrame) -> Target {
        let mut valid_pixels = 0usize;
        let mut hottest: Option<Hotspot> = None;
        for (row, column, temperature) in frame.valid_pixels() {
            valid_pixels += 1;
            match hottest {
                Some(current) if temperature <= current.temperature => {}
                _ => {
                    hottest = Some(Hotspot {
                        row,
                        column,
                        temperature,
                    })
                }
            }
        }
        let valid = valid_pixels >= self.min_valid_pixels
            && hottest.map_or(false, |hotspot| hotspot.temperature >= self.threshold);
        Target { hottest, valid }
    }
}
