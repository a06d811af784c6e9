//! Cursor-based big-endian codec for fixed-layout wire headers

use thiserror::Error;

/// Errors raised while moving bytes in or out of a buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer overflow: need {needed} bytes, have {available}")]
    BufferOverflow { needed: usize, available: usize },

    #[error("buffer underflow: need {needed} bytes, have {available}")]
    BufferUnderflow { needed: usize, available: usize },
}

/// Write cursor over a mutable buffer
pub struct EncodeContext<'a> {
    buffer: &'a mut [u8],
    cursor: usize,
}

impl<'a> EncodeContext<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.cursor)
    }

    /// Write raw bytes at the cursor
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize, CodecError> {
        let len = data.len();
        if self.remaining() < len {
            return Err(CodecError::BufferOverflow {
                needed: len,
                available: self.remaining(),
            });
        }

        self.buffer[self.cursor..self.cursor + len].copy_from_slice(data);
        self.cursor += len;
        Ok(len)
    }
}

/// Read cursor over an immutable buffer
pub struct DecodeContext<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

impl<'a> DecodeContext<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.cursor)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if self.remaining() < N {
            return Err(CodecError::BufferUnderflow {
                needed: N,
                available: self.remaining(),
            });
        }

        let mut arr = [0u8; N];
        arr.copy_from_slice(&self.buffer[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(arr)
    }
}

/// Header fields with a fixed network-order representation
pub trait Codec: Sized {
    /// Encode into the context, returning the bytes written
    fn encode(&self, ctx: &mut EncodeContext) -> Result<usize, CodecError>;

    fn decode(ctx: &mut DecodeContext) -> Result<Self, CodecError>;
}

macro_rules! impl_codec_int {
    ($ty:ty, $size:expr) => {
        impl Codec for $ty {
            fn encode(&self, ctx: &mut EncodeContext) -> Result<usize, CodecError> {
                ctx.write_bytes(&self.to_be_bytes())
            }

            fn decode(ctx: &mut DecodeContext) -> Result<Self, CodecError> {
                Ok(Self::from_be_bytes(ctx.read_array::<$size>()?))
            }
        }
    };
}

impl_codec_int!(u8, 1);
impl_codec_int!(u16, 2);
impl_codec_int!(i16, 2);
impl_codec_int!(i64, 8);

impl Codec for [u8; 4] {
    fn encode(&self, ctx: &mut EncodeContext) -> Result<usize, CodecError> {
        ctx.write_bytes(self)
    }

    fn decode(ctx: &mut DecodeContext) -> Result<Self, CodecError> {
        ctx.read_array::<4>()
    }
}
