//! Sequential little-endian reader over a fixed byte buffer
//!
//! Alignment is relative to the start of the wrapped buffer, so callers must
//! invoke [`ByteCursor::align`] exactly where the producer inserted padding.

use crate::core::Error;
use crate::core::types::Result;

/// Little-endian cursor over an immutable byte slice
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    buffer: &'a [u8],
    position: usize,
}

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Read a little-endian `", stringify!($ty), "`")]
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.take(std::mem::size_of::<$ty>())?;
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

macro_rules! read_array {
    ($name:ident, $single:ident, $ty:ty) => {
        #[doc = concat!("Read `count` consecutive `", stringify!($ty), "` values")]
        pub fn $name(&mut self, count: usize) -> Result<Vec<$ty>> {
            // check the whole span first so a bad count fails before allocating
            self.ensure(count.saturating_mul(std::mem::size_of::<$ty>()))?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(self.$single()?);
            }
            Ok(out)
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::OutOfRange {
                position: self.position,
                requested: n,
                len: self.buffer.len(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.buffer[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    /// Advance to the next multiple of `n`. No-op when already aligned.
    pub fn align(&mut self, n: usize) -> Result<()> {
        let rem = self.position % n;
        if rem != 0 {
            self.skip(n - rem)?;
        }
        Ok(())
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Raw slice of `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    read_le!(read_u8, u8);
    read_le!(read_i8, i8);
    read_le!(read_u16, u16);
    read_le!(read_i16, i16);
    read_le!(read_u32, u32);
    read_le!(read_i32, i32);
    read_le!(read_f32, f32);
    read_le!(read_f64, f64);

    /// Read a 64-bit id stored as two little-endian 32-bit words (low, high).
    /// Values above 2^53 are rejected as corrupt since the producer only
    /// emits ids that survive a round trip through a double.
    pub fn read_u64(&mut self) -> Result<u64> {
        const SAFE_MAX: u64 = (1 << 53) - 1;
        let start = self.position;
        let low = self.read_u32()? as u64;
        let high = self.read_u32()? as u64;
        let value = (high << 32) | low;
        if value > SAFE_MAX {
            return Err(Error::Corrupt(format!("id {} at offset {} exceeds 2^53", value, start)));
        }
        Ok(value)
    }

    /// Read `u16` length-prefixed UTF-8 text
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidText)
    }

    read_array!(read_i8_array, read_i8, i8);
    read_array!(read_i16_array, read_i16, i16);
    read_array!(read_i32_array, read_i32, i32);
    read_array!(read_f32_array, read_f32, f32);
    read_array!(read_f64_array, read_f64, f64);

    /// Read a fixed-size array of doubles
    pub fn read_f64_n<const N: usize>(&mut self) -> Result<[f64; N]> {
        let mut out = [0.0; N];
        self.ensure(N * 8)?;
        for v in out.iter_mut() {
            *v = self.read_f64()?;
        }
        Ok(out)
    }
}
