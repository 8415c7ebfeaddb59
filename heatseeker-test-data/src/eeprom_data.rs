// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross

/// The number of 16-bit words in the calibration block (0x2400 through 0x273F).
pub const EEPROM_LENGTH: usize = 0x2740 - 0x2400;

/// The calibration block from the datasheet's worked example.
// Each line is 8 words. The first two lines are device configuration the calibration ignores,
// the next six are the shared calibration data.
const DATASHEET_EEPROM_HEADER: &[u8] = b"\
    \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
    \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
    \x42\x10\xff\xbb\x02\x02\xf2\x02\xf2\xf2\xe2\xe2\xd1\xe1\xb1\xd1\
    \xf1\x0f\xf0\x0f\xe0\xef\xe0\xef\xe1\xe1\xf3\xf2\xf4\x04\xe5\x04\
    \x79\xa6\x2f\x44\xff\xdd\x22\x10\x33\x33\x22\x33\xef\x01\x9a\xcc\
    \xee\xdc\x10\xff\x22\x21\x33\x33\x23\x33\x01\x12\xee\xff\xbb\xdd\
    \x18\xef\x2f\xf1\x59\x52\x9d\x68\x54\x54\x09\x94\x69\x56\x53\x54\
    \x23\x63\xe4\x46\xfb\xb5\x04\x4b\xf0\x20\x97\x97\x97\x97\x28\x89";

/// The per-pixel word the worked example uses, applied to every pixel.
const DATASHEET_PIXEL_WORD: u16 = 0x08a0;

/// The datasheet calibration block, as words.
pub fn datasheet_eeprom() -> [u16; EEPROM_LENGTH] {
    let mut words = [DATASHEET_PIXEL_WORD; EEPROM_LENGTH];
    words
        .iter_mut()
        .zip(DATASHEET_EEPROM_HEADER.chunks_exact(2))
        .for_each(|(word, pair)| *word = u16::from_be_bytes([pair[0], pair[1]]));
    words
}
