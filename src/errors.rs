use crate::bmp::Section;
use std::io;
use thiserror::Error;

/// Errors raised by the encoder and decoder.
///
/// The row scanner itself is total, encoding can only fail on
/// preconditions or when the underlying writer fails.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RleError {
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("too small pixel buffer, expected at least {expected} bytes but found {found}")]
    TooSmallInput { expected: usize, found: usize },

    #[error("too small token buffer, expected at least {expected} tokens but found {found}")]
    TooSmallOutput { expected: usize, found: usize },

    #[error("received {found} bytes of pixel data, the image needs {expected}")]
    IncompleteImage { expected: usize, found: usize },

    #[error("pixel data continues after the last of {height} rows")]
    TooManyRows { height: usize },

    #[error("run of {run} pixels at column {column} overflows row {row} of width {width}")]
    RowOverflow {
        row: usize,
        column: usize,
        run: usize,
        width: usize,
    },

    #[error("token stream ended inside an absolute run or delta")]
    Truncated,

    #[error("token stream ended without an end of bitmap marker")]
    MissingEndOfBitmap,

    #[error("data after the end of bitmap marker")]
    TrailingData,

    #[error("decoded image of {0} bytes does not fit in memory")]
    OutputTooLarge(usize),

    #[error("token stream has odd length {0}")]
    OddLength(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<RleError> for io::Error {
    fn from(value: RleError) -> Self {
        match value {
            RleError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Errors raised while reading, validating or writing bitmap files.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BmpError {
    #[error("invalid magic bytes {0:02X?}, file does not start with BM")]
    InvalidMagicBytes([u8; 2]),

    #[error("reserved header fields must be zero, found {0} and {1}")]
    ReservedFields(u16, u16),

    #[error("unsupported info header of {0} bytes, expected at least 40")]
    UnsupportedInfoHeader(u32),

    #[error("unsupported number of color planes {0}, expected 1")]
    UnsupportedPlanes(u16),

    #[error("unsupported bit depth {0}, expected 8 bits per pixel")]
    UnsupportedBitDepth(u16),

    #[error("unsupported compression {found}, expected {expected}")]
    UnsupportedCompression { expected: u32, found: u32 },

    #[error("unsupported dimensions {width}x{height}, both must be positive")]
    InvalidDimensions { width: i32, height: i32 },

    #[error("pixel data offset {0} points inside the headers")]
    InvalidPixelOffset(u32),

    #[error("could not read the {section}, expected {expected} bytes but found {found}")]
    Truncated {
        section: Section,
        expected: usize,
        found: usize,
    },

    #[error("could not read the {section}: {source}")]
    Read { section: Section, source: io::Error },

    #[error("could not write the {section}: {source}")]
    Write { section: Section, source: io::Error },

    #[error("image of {0} bytes does not fit a bitmap file")]
    TooLarge(usize),

    #[error("corrupt pixel data: {0}")]
    Rle(#[from] RleError),
}

impl BmpError {
    /// True for errors caused by the file contents rather than I/O.
    pub fn is_format_error(&self) -> bool {
        !matches!(
            self,
            BmpError::Read { .. } | BmpError::Write { .. } | BmpError::Rle(_)
        )
    }
}
