// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Frames at each stage of the pipeline, and the placement rules that merge two sub-pages into
//! one image.
use core::fmt;

use bitvec::prelude::*;

use crate::mlx90640::{References, HEIGHT, NUM_PIXELS, PIXELS_PER_SUBPAGE, WIDTH};
use crate::register::{ReorderPattern, Subpage};

/// One bit per pixel, row-major.
pub type PixelMask = BitArr!(for NUM_PIXELS, in u32, Lsb0);

impl ReorderPattern {
    /// The sub-page the pixel at (`row`, `column`) is captured in.
    pub fn subpage_of(self, row: usize, column: usize) -> Subpage {
        let parity = match self {
            ReorderPattern::Chess => (row + column) % 2,
            ReorderPattern::Interleave => row % 2,
        };
        if parity == 0 {
            Subpage::Zero
        } else {
            Subpage::One
        }
    }

    /// Whether any pixel of `row` is captured in `subpage`.
    pub fn row_has_subpage(self, row: usize, subpage: Subpage) -> bool {
        match self {
            ReorderPattern::Chess => true,
            ReorderPattern::Interleave => self.subpage_of(row, 0) == subpage,
        }
    }

    /// Merge two sub-pages into a row-major grid `width` pixels wide.
    ///
    /// Each sub-page slice holds its pixels in row-major order, exactly the cells
    /// [`subpage_of`][Self::subpage_of] assigns to it. Cells left over when a slice runs short are
    /// untouched.
    pub fn assemble<T: Copy>(self, width: usize, subpages: [&[T]; 2], destination: &mut [T]) {
        let mut sources = subpages.map(|subpage| subpage.iter());
        for (index, cell) in destination.iter_mut().enumerate() {
            let subpage = self.subpage_of(index / width, index % width);
            if let Some(value) = sources[subpage.index()].next() {
                *cell = *value;
            }
        }
    }
}

/// Half of a capture: the pixels of one sub-page, in row-major order, and the references read
/// with them.
#[derive(Clone, Debug, PartialEq)]
pub struct SubFrame {
    pub(crate) subpage: Subpage,
    pub(crate) pixels: [i16; PIXELS_PER_SUBPAGE],
    pub(crate) references: References,
}

impl SubFrame {
    pub fn new(
        subpage: Subpage,
        pixels: [i16; PIXELS_PER_SUBPAGE],
        references: References,
    ) -> Self {
        Self {
            subpage,
            pixels,
            references,
        }
    }

    pub fn subpage(&self) -> Subpage {
        self.subpage
    }

    pub fn pixels(&self) -> &[i16] {
        &self.pixels
    }

    pub fn references(&self) -> &References {
        &self.references
    }
}

/// A complete capture of raw pixel counts.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pattern: ReorderPattern,
    pixels: [i16; NUM_PIXELS],
    references: [References; 2],
}

impl RawFrame {
    /// Merge sub-page 0 and sub-page 1 according to `pattern`.
    ///
    /// Both sub-frames are consumed; the arguments may be given in either order.
    pub fn assemble(pattern: ReorderPattern, first: SubFrame, second: SubFrame) -> Self {
        let (zero, one) = if first.subpage == Subpage::Zero {
            (first, second)
        } else {
            (second, first)
        };
        let mut pixels = [0i16; NUM_PIXELS];
        pattern.assemble(WIDTH, [&zero.pixels, &one.pixels], &mut pixels);
        Self {
            pattern,
            pixels,
            references: [zero.references, one.references],
        }
    }

    /// Build a frame from an already assembled grid.
    pub fn from_parts(
        pattern: ReorderPattern,
        pixels: [i16; NUM_PIXELS],
        references: [References; 2],
    ) -> Self {
        Self {
            pattern,
            pixels,
            references,
        }
    }

    pub fn pattern(&self) -> ReorderPattern {
        self.pattern
    }

    pub fn pixels(&self) -> &[i16; NUM_PIXELS] {
        &self.pixels
    }

    pub fn pixel(&self, row: usize, column: usize) -> Option<i16> {
        index_of(row, column).map(|index| self.pixels[index])
    }

    pub fn references(&self, subpage: Subpage) -> &References {
        &self.references[subpage.index()]
    }
}

/// A grid of temperatures in °C, with a validity bit per pixel.
///
/// Invalid pixels hold `NaN` and must not be used; [`get`][Self::get] filters them out.
#[derive(Clone, Debug, PartialEq)]
pub struct TemperatureFrame {
    temperatures: [f32; NUM_PIXELS],
    valid: PixelMask,
    ambient: f32,
}

impl TemperatureFrame {
    /// A frame with every pixel invalid.
    pub fn invalid(ambient: f32) -> Self {
        Self {
            temperatures: [f32::NAN; NUM_PIXELS],
            valid: PixelMask::ZERO,
            ambient,
        }
    }

    /// A frame with every pixel valid and at `temperature`.
    pub fn uniform(temperature: f32, ambient: f32) -> Self {
        let mut frame = Self::invalid(ambient);
        frame.temperatures = [temperature; NUM_PIXELS];
        frame.valid.fill(true);
        frame
    }

    /// Set a pixel, or mark it invalid with `None`. Out of bounds coordinates are ignored.
    pub fn set(&mut self, row: usize, column: usize, temperature: Option<f32>) {
        if let Some(index) = index_of(row, column) {
            self.set_index(index, temperature);
        }
    }

    pub(crate) fn set_index(&mut self, index: usize, temperature: Option<f32>) {
        match temperature {
            Some(temperature) if temperature.is_finite() => {
                self.temperatures[index] = temperature;
                self.valid.set(index, true);
            }
            _ => {
                self.temperatures[index] = f32::NAN;
                self.valid.set(index, false);
            }
        }
    }

    /// The temperature at (`row`, `column`) if the pixel is valid.
    pub fn get(&self, row: usize, column: usize) -> Option<f32> {
        index_of(row, column)
            .filter(|index| self.valid[*index])
            .map(|index| self.temperatures[index])
    }

    pub fn is_valid(&self, row: usize, column: usize) -> bool {
        index_of(row, column).map_or(false, |index| self.valid[index])
    }

    pub fn valid_count(&self) -> usize {
        self.valid.count_ones()
    }

    /// The raw temperature grid, row-major. Check [`validity`][Self::validity] before use.
    pub fn temperatures(&self) -> &[f32; NUM_PIXELS] {
        &self.temperatures
    }

    pub fn validity(&self) -> &PixelMask {
        &self.valid
    }

    /// The sensor's own temperature while capturing this frame.
    pub fn ambient_temperature(&self) -> f32 {
        self.ambient
    }

    /// Valid pixels as `(row, column, temperature)`, in row-major order.
    pub fn valid_pixels(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.valid
            .iter_ones()
            .map(move |index| (index / WIDTH, index % WIDTH, self.temperatures[index]))
    }

    /// A text rendering of the frame, two characters per pixel.
    pub fn ascii_art(&self) -> AsciiArt<'_> {
        AsciiArt(self)
    }
}

fn index_of(row: usize, column: usize) -> Option<usize> {
    (row < HEIGHT && column < WIDTH).then(|| row * WIDTH + column)
}

/// Renders a [`TemperatureFrame`] on a ten step ramp from coldest to hottest valid pixel.
///
/// Invalid pixels are drawn as `><`.
pub struct AsciiArt<'a>(&'a TemperatureFrame);

impl fmt::Display for AsciiArt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RAMP: &[u8] = b" -.:=+*#%@";
        let (min, max) = self
            .0
            .valid_pixels()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), (_, _, t)| {
                (min.min(t), max.max(t))
            });
        let span = max - min;
        for row in 0..HEIGHT {
            for column in 0..WIDTH {
                match self.0.get(row, column) {
                    Some(t) => {
                        let level = if span > 0.0 {
                            ((t - min) / span * RAMP.len() as f32) as usize
                        } else {
                            0
                        };
                        let c = char::from(RAMP[level.min(RAMP.len() - 1)]);
                        write!(f, "{}{}", c, c)?;
                    }
                    None => f.write_str("><")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
