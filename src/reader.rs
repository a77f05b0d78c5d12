//! # Byte Reader
//!
//! A cursor over the module bytes. All multi-byte fields in the binary
//! are little-endian; variable-length integers use LEB128 with 7 payload
//! bits per byte and the continuation flag in the high bit.
//!
//! The reader borrows the underlying buffer, so several cursors can walk
//! the same module at once (the control-flow pre-pass re-scans a body the
//! decoder has already positioned past). `pos` is public: the execution
//! engine steers it directly for calls, branches and returns.

use crate::error::DecodeError;

pub struct Reader<'a> {
    bytes: &'a [u8],
    pub pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    /// A cursor positioned at `pos`, used for secondary scans.
    pub fn at(bytes: &'a [u8], pos: usize) -> Reader<'a> {
        Reader { bytes, pos }
    }

    /// The whole underlying buffer, independent of the cursor borrow.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    /// A little-endian 32-bit word (the magic and version fields).
    pub fn read_word(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Four little-endian bytes reinterpreted as an IEEE-754 single.
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let bits = self.read_word()?;
        Ok(f32::from_bits(bits))
    }

    /// Eight little-endian bytes reinterpreted as an IEEE-754 double.
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_bits(u64::from_le_bytes(raw)))
    }

    /// Decode a LEB128 integer of at most `maxbits` meaningful bits.
    ///
    /// More than `ceil(maxbits / 7)` continuation bytes is an overflow.
    /// For signed decoding the final byte's 0x40 bit sign-extends the
    /// result when fewer than 64 bits were consumed. Unsigned results are
    /// returned in the same `i64`, reinterpreted by the caller.
    pub fn read_leb(&mut self, maxbits: u32, signed: bool) -> Result<i64, DecodeError> {
        let start = self.pos;
        let limit = (maxbits + 6) / 7;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        let mut continuations: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7f) << shift;
            }
            if byte & 0x80 == 0 {
                shift += 7;
                if signed && shift < 64 && byte & 0x40 != 0 {
                    result |= u64::MAX << shift;
                }
                break;
            }
            shift += 7;
            continuations += 1;
            if continuations > limit {
                return Err(DecodeError::LebOverflow(start));
            }
        }
        Ok(result as i64)
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sleb, uleb};
    use proptest::prelude::*;

    fn rd(bytes: &[u8]) -> Reader<'_> {
        Reader::new(bytes)
    }

    #[test]
    fn unsigned_leb_vectors() {
        assert_eq!(rd(&[0x00]).read_leb(32, false).unwrap(), 0);
        assert_eq!(rd(&[0x7f]).read_leb(32, false).unwrap(), 127);
        assert_eq!(rd(&[0x80, 0x01]).read_leb(32, false).unwrap(), 128);
        // The worked example from the LEB128 description: 624485.
        assert_eq!(rd(&[0xe5, 0x8e, 0x26]).read_leb(32, false).unwrap(), 624485);
    }

    #[test]
    fn signed_leb_vectors() {
        assert_eq!(rd(&[0x7f]).read_leb(32, true).unwrap(), -1);
        assert_eq!(rd(&[0x41]).read_leb(32, true).unwrap(), -63);
        assert_eq!(rd(&[0x3f]).read_leb(32, true).unwrap(), 63);
        assert_eq!(rd(&[0x80, 0x7f]).read_leb(32, true).unwrap(), -128);
        assert_eq!(
            rd(&[0xc0, 0xbb, 0x78]).read_leb(32, true).unwrap(),
            -123456
        );
        // A canonical five-byte -1 still decodes cleanly.
        assert_eq!(
            rd(&[0xff, 0xff, 0xff, 0xff, 0x7f]).read_leb(32, true).unwrap() as i32,
            -1
        );
    }

    #[test]
    fn leb_overflow_is_rejected() {
        let too_long = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(
            rd(&too_long).read_leb(32, false),
            Err(DecodeError::LebOverflow(0))
        );
    }

    #[test]
    fn truncated_leb_reports_eof() {
        assert_eq!(
            rd(&[0x80]).read_leb(32, false),
            Err(DecodeError::UnexpectedEof(1))
        );
    }

    #[test]
    fn words_and_floats_are_little_endian() {
        assert_eq!(rd(&[0x00, 0x61, 0x73, 0x6d]).read_word().unwrap(), 0x6d736100);
        assert_eq!(rd(&1.0f32.to_le_bytes()).read_f32().unwrap(), 1.0);
        assert_eq!(rd(&(-2.5f64).to_le_bytes()).read_f64().unwrap(), -2.5);
    }

    #[test]
    fn cursor_and_eof() {
        let bytes = [1u8, 2, 3];
        let mut r = rd(&bytes);
        assert_eq!(r.read_byte().unwrap(), 1);
        assert_eq!(r.read_bytes(2).unwrap(), &[2, 3]);
        assert!(r.eof());
        assert_eq!(r.read_byte(), Err(DecodeError::UnexpectedEof(3)));
    }

    proptest! {
        #[test]
        fn unsigned_round_trip(v in any::<u32>()) {
            let encoded = uleb(u64::from(v));
            let mut r = Reader::new(&encoded);
            prop_assert_eq!(r.read_leb(32, false).unwrap() as u32, v);
            prop_assert!(r.eof());
        }

        #[test]
        fn signed_round_trip(v in any::<i64>()) {
            let encoded = sleb(v);
            let mut r = Reader::new(&encoded);
            prop_assert_eq!(r.read_leb(64, true).unwrap(), v);
            prop_assert!(r.eof());
        }
    }
}
