// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross

/// A small cursor over a slice of 16-bit words, consuming from the front.
///
/// This is the word-sized cousin of `bytes::Buf`, with only the operations needed to unpack the
/// calibration block. Callers are responsible for checking the length up front; reading past the
/// end panics.
pub(crate) trait WordBuffer {
    fn advance(&mut self, cnt: usize);
    fn get_u16(&mut self) -> u16;

    fn get_i16(&mut self) -> i16 {
        self.get_u16() as i16
    }

    /// Split a word into its high and low bytes, both signed.
    fn get_i8_pair(&mut self) -> [i8; 2] {
        let [high, low] = self.get_u16().to_be_bytes();
        [high as i8, low as i8]
    }

    /// Split a word into four unsigned nibbles, most significant first.
    fn get_u4s(&mut self) -> [u8; 4] {
        let word = self.get_u16();
        [
            ((word >> 12) & 0xF) as u8,
            ((word >> 8) & 0xF) as u8,
            ((word >> 4) & 0xF) as u8,
            (word & 0xF) as u8,
        ]
    }

    /// Split a word into four signed nibbles, most significant first.
    fn get_i4s(&mut self) -> [i8; 4] {
        let word = self.get_u16();
        [12, 8, 4, 0].map(|shift| sign_extend((word >> shift) & 0xF, 4) as i8)
    }

    /// Split a word into a signed 6-bit value (the top bits) and a 10-bit remainder.
    ///
    /// The remainder is left unconverted, as its signedness differs between fields.
    fn get_6_10(&mut self) -> (i8, u16) {
        let word = self.get_u16();
        (sign_extend(word >> 10, 6) as i8, word & 0x03FF)
    }
}

impl WordBuffer for &[u16] {
    fn advance(&mut self, cnt: usize) {
        *self = &self[cnt..];
    }

    fn get_u16(&mut self) -> u16 {
        let (word, rest) = self.split_at(1);
        *self = rest;
        word[0]
    }
}

/// Check if the n-th bit is set.
///
/// Bits are 0-indexed, from the LSB.
pub(crate) fn is_bit_set<B>(value: B, index: usize) -> bool
where
    B: num_traits::PrimInt + num_traits::Unsigned,
{
    (value & (B::one() << index)) > B::zero()
}

/// Interpret the lowest `num_bits` of `value` as a two's complement integer.
pub(crate) fn sign_extend(value: u16, num_bits: u8) -> i16 {
    let shift_amount = 16 - u32::from(num_bits);
    ((value << shift_amount) as i16) >> shift_amount
}

#[cfg(test)]
mod test {
    use super::WordBuffer;

    const DATA: [u16; 3] = [0xdead, 0xbeef, 0x9d68];

    #[test]
    fn buffer_advance() {
        let mut buf = &DATA[..];
        buf.advance(1);
        assert_eq!(buf, &DATA[1..]);
        buf.advance(2);
        assert!(buf.is_empty());
    }

    #[test]
    fn buffer_get_i16() {
        let mut buf = &DATA[..];
        assert_eq!(buf.get_i16(), -8531);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn buffer_get_i8_pair() {
        let mut buf = &DATA[2..];
        // K_Vdd and V_dd25 from the datasheet worked example
        assert_eq!(buf.get_i8_pair(), [-99, 0x68]);
    }

    #[test]
    fn buffer_nibbles() {
        let mut buf = &[0x4210u16, 0xF20E][..];
        assert_eq!(buf.get_u4s(), [4, 2, 1, 0]);
        assert_eq!(buf.get_i4s(), [-1, 2, 0, -2]);
    }

    #[test]
    fn buffer_6_10() {
        // alpha_CP from the worked example: ratio 0x12, subpage 0 value 0x1c6
        let mut buf = &[0x49c6u16][..];
        assert_eq!(buf.get_6_10(), (0x12, 0x1c6));
        let mut buf = &[0xFFFFu16][..];
        assert_eq!(buf.get_6_10(), (-1, 0x3FF));
    }

    #[test]
    fn is_bit_set() {
        for n in 0..16 {
            let value: u16 = 1 << n;
            assert!(
                super::is_bit_set(value, n),
                "is_bit_set was incorrect for bit {}",
                n
            );
        }
    }

    #[test]
    fn sign_extend() {
        assert_eq!(super::sign_extend(0x00ff, 8), -1);
        assert_eq!(super::sign_extend(0x03ff, 10), -1);
        assert_eq!(super::sign_extend(0x01ff, 10), 511);
        // Upper bits are ignored
        assert_eq!(super::sign_extend(0xf3ff, 10), -1);
    }
}
