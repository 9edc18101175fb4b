//! # RLE8 Encoding Scheme
//!
//! Compressed pixel data is a sequence of 2-byte tokens.
//!
//! ```text
//!          byte 0    byte 1
//!         ┌────────┬────────┐
//!         │ count  │ color  │
//!         └────────┴────────┘
//! ```
//!
//! When `count` is non-zero the token is an *encoded run*: repeat the
//! palette index `color` `count` times.
//!
//! When `count` is zero the token is an escape, selected by `color`:
//!
//! ```text
//!         0x00 0x00   end of line
//!         0x00 0x01   end of bitmap
//!         0x00 0x02   delta, followed by one {right, up} pair (decode only)
//!         0x00 N      absolute run, N >= 3 literal bytes follow,
//!                     packed two per token, zero padded when N is odd
//! ```
//!
//! Runs never cross a scanline. Rows are `width` pixels wide; the bytes
//! that pad each uncompressed row to a multiple of 4 are not encoded.
//! Every row but the last is followed by end of line, and the stream is
//! always terminated by end of bitmap.
//!
//! In the best case one token encodes 255 pixels. In the worst case
//! (no three equal neighbours) a row costs at most one token per pixel,
//! see [`max_encoded_tokens`].
//!
//! # Scanning
//!
//! Each row is scanned by a two state machine. In absolute state a
//! literal span is grown until three equal bytes start ahead, the row
//! ends or the span reaches 255 bytes. Spans shorter than 3 bytes are
//! abandoned: the scanner rewinds to where the span started and emits
//! an encoded run instead. In encoded state the run of equal bytes at
//! the cursor is measured and emitted.

#[macro_use]
extern crate log;

mod bmp;
mod derle;
mod errors;
mod rle;
mod token;

pub use bmp::{
    check_validity, Bitmap, Compression, CompressedBitmap, FileHeader, InfoHeader, Section, MAGIC,
};
pub use derle::{decode, DeRle};
pub use errors::{BmpError, RleError};
pub use rle::{
    encode, encode_into, encode_into_slice, max_encoded_tokens, worst_case_capacity, Rle,
};
pub use token::{tokens_from_bytes, tokens_to_bytes, Token};

use std::fmt;
use std::io::Write;

/// uncompressed rows are padded to this many bytes
pub const ROW_ALIGNMENT: usize = 4;
/// longest encoded run and longest absolute run
pub const MAX_RUN_LENGTH: usize = u8::MAX as usize;
/// shortest literal span worth an absolute run header
pub const MIN_ABSOLUTE_RUN: usize = 3;
/// byte written by the decoder for row padding and skipped pixels
pub const FILL_BYTE: u8 = 0;

/// Number of padding bytes after `width` pixels of an uncompressed row.
#[inline]
pub const fn row_padding(width: usize) -> usize {
    (ROW_ALIGNMENT - width % ROW_ALIGNMENT) % ROW_ALIGNMENT
}

/// Padded length of an uncompressed row.
#[inline]
pub const fn row_stride(width: usize) -> usize {
    width + row_padding(width)
}

/// Bytes of `height` padded rows, `None` when that overflows.
pub(crate) fn image_len(width: usize, height: usize) -> Option<usize> {
    width.checked_add(row_padding(width))?.checked_mul(height)
}

/// Encoder implementations selectable at runtime.
///
/// Both run the same row scanner and produce identical tokens, they
/// only differ in how pixels are fed and where tokens are collected.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Algorithm {
    /// whole image in memory, tokens collected in a `Vec`
    #[default]
    Buffered,
    /// pixels pushed through [`Rle`] as an `io::Write`
    Streaming,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Buffered, Algorithm::Streaming];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Buffered => "buffered",
            Algorithm::Streaming => "streaming",
        }
    }

    /// Encode one image with this implementation.
    pub fn encode(self, pixels: &[u8], width: usize, height: usize) -> Result<Vec<Token>, RleError> {
        match self {
            Algorithm::Buffered => encode(pixels, width, height),
            Algorithm::Streaming => {
                let len = rle::check_image(pixels, width, height)?;
                let mut out = Vec::with_capacity(2 * max_encoded_tokens(width, height));
                let mut rle = Rle::new(&mut out, width, height)?;
                rle.write_all(&pixels[..len])?;
                rle.finalize()?;
                tokens_from_bytes(&out)
            }
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
