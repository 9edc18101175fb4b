//! Windows bitmap container for 8 bit palette images.
//!
//! ```text
//!         ┌──────────────┬──────────────┬───────────────┬────────────┐
//!         │ file header  │ info header  │ offset region │ pixel data │
//!         │   14 bytes   │   40 bytes   │  (palette..)  │            │
//!         └──────────────┴──────────────┴───────────────┴────────────┘
//!                                        ▲               ▲
//!                                        54              pixel_offset
//! ```
//!
//! All multi-byte fields are little-endian. Headers are packed and
//! unpacked field by field at fixed offsets. Everything between the info
//! header and the pixel data (palette, bigger info header versions, gaps)
//! is carried through verbatim.

use crate::derle::decode;
use crate::token::{tokens_from_bytes, tokens_to_bytes, Token};
use crate::{image_len, Algorithm, BmpError};
use std::fmt;
use std::io::{self, Read, Write};

pub const MAGIC: [u8; 2] = *b"BM";
const HEADERS_SIZE: usize = FileHeader::SIZE + InfoHeader::SIZE;

#[inline]
fn u16_le(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
fn u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
fn i32_le(bytes: &[u8], at: usize) -> i32 {
    u32_le(bytes, at) as i32
}

/// Parts of a bitmap file, used to report where reading or writing failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Section {
    FileHeader,
    InfoHeader,
    Offset,
    Pixels,
    Tokens,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::FileHeader => "file header",
            Section::InfoHeader => "info header",
            Section::Offset => "offset region",
            Section::Pixels => "pixel data",
            Section::Tokens => "compressed pixel data",
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Compression {
    Rgb,
    Rle8,
    Other(u32),
}

impl From<u32> for Compression {
    fn from(value: u32) -> Self {
        match value {
            0 => Compression::Rgb,
            1 => Compression::Rle8,
            other => Compression::Other(other),
        }
    }
}

impl From<Compression> for u32 {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Rgb => 0,
            Compression::Rle8 => 1,
            Compression::Other(other) => other,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FileHeader {
    pub magic: [u8; 2],
    pub file_size: u32,
    pub reserved1: u16,
    pub reserved2: u16,
    pub pixel_offset: u32,
}

impl FileHeader {
    pub const SIZE: usize = 14;

    pub fn parse(bytes: &[u8; Self::SIZE]) -> FileHeader {
        FileHeader {
            magic: [bytes[0], bytes[1]],
            file_size: u32_le(bytes, 2),
            reserved1: u16_le(bytes, 6),
            reserved2: u16_le(bytes, 8),
            pixel_offset: u32_le(bytes, 10),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut a = [0; Self::SIZE];
        a[0..2].copy_from_slice(&self.magic);
        a[2..6].copy_from_slice(&self.file_size.to_le_bytes());
        a[6..8].copy_from_slice(&self.reserved1.to_le_bytes());
        a[8..10].copy_from_slice(&self.reserved2.to_le_bytes());
        a[10..14].copy_from_slice(&self.pixel_offset.to_le_bytes());
        a
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InfoHeader {
    pub header_size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bits_per_pixel: u16,
    pub compression: Compression,
    pub image_size: u32,
    pub x_pixels_per_meter: i32,
    pub y_pixels_per_meter: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl InfoHeader {
    pub const SIZE: usize = 40;

    pub fn parse(bytes: &[u8; Self::SIZE]) -> InfoHeader {
        InfoHeader {
            header_size: u32_le(bytes, 0),
            width: i32_le(bytes, 4),
            height: i32_le(bytes, 8),
            planes: u16_le(bytes, 12),
            bits_per_pixel: u16_le(bytes, 14),
            compression: Compression::from(u32_le(bytes, 16)),
            image_size: u32_le(bytes, 20),
            x_pixels_per_meter: i32_le(bytes, 24),
            y_pixels_per_meter: i32_le(bytes, 28),
            colors_used: u32_le(bytes, 32),
            colors_important: u32_le(bytes, 36),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut a = [0; Self::SIZE];
        a[0..4].copy_from_slice(&self.header_size.to_le_bytes());
        a[4..8].copy_from_slice(&self.width.to_le_bytes());
        a[8..12].copy_from_slice(&self.height.to_le_bytes());
        a[12..14].copy_from_slice(&self.planes.to_le_bytes());
        a[14..16].copy_from_slice(&self.bits_per_pixel.to_le_bytes());
        a[16..20].copy_from_slice(&u32::from(self.compression).to_le_bytes());
        a[20..24].copy_from_slice(&self.image_size.to_le_bytes());
        a[24..28].copy_from_slice(&self.x_pixels_per_meter.to_le_bytes());
        a[28..32].copy_from_slice(&self.y_pixels_per_meter.to_le_bytes());
        a[32..36].copy_from_slice(&self.colors_used.to_le_bytes());
        a[36..40].copy_from_slice(&self.colors_important.to_le_bytes());
        a
    }

    /// Width and height, valid after [`check_validity`].
    fn dimensions(&self) -> (usize, usize) {
        (self.width as usize, self.height as usize)
    }
}

/// Reject anything but a bottom-up, single plane, 8 bit bitmap stored
/// with `expected` compression.
pub fn check_validity(
    file: &FileHeader,
    info: &InfoHeader,
    expected: Compression,
) -> Result<(), BmpError> {
    if file.magic != MAGIC {
        return Err(BmpError::InvalidMagicBytes(file.magic));
    }
    if file.reserved1 != 0 || file.reserved2 != 0 {
        return Err(BmpError::ReservedFields(file.reserved1, file.reserved2));
    }
    if (info.header_size as usize) < InfoHeader::SIZE {
        return Err(BmpError::UnsupportedInfoHeader(info.header_size));
    }
    if info.planes != 1 {
        return Err(BmpError::UnsupportedPlanes(info.planes));
    }
    if info.bits_per_pixel != 8 {
        return Err(BmpError::UnsupportedBitDepth(info.bits_per_pixel));
    }
    if info.compression != expected {
        return Err(BmpError::UnsupportedCompression {
            expected: expected.into(),
            found: info.compression.into(),
        });
    }
    // run-length bitmaps cannot be stored top-down
    if info.width <= 0 || info.height <= 0 {
        return Err(BmpError::InvalidDimensions {
            width: info.width,
            height: info.height,
        });
    }
    if (file.pixel_offset as usize) < HEADERS_SIZE {
        return Err(BmpError::InvalidPixelOffset(file.pixel_offset));
    }
    Ok(())
}

fn read_section<R: Read>(reader: &mut R, buf: &mut [u8], section: Section) -> Result<(), BmpError> {
    let mut found = 0;
    while found < buf.len() {
        match reader.read(&mut buf[found..]) {
            Ok(0) => {
                return Err(BmpError::Truncated {
                    section,
                    expected: buf.len(),
                    found,
                })
            }
            Ok(n) => found += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(BmpError::Read { section, source }),
        }
    }
    Ok(())
}

fn write_section<W: Write>(writer: &mut W, bytes: &[u8], section: Section) -> Result<(), BmpError> {
    writer
        .write_all(bytes)
        .map_err(|source| BmpError::Write { section, source })
}

fn to_u32(len: usize) -> Result<u32, BmpError> {
    u32::try_from(len).map_err(|_| BmpError::TooLarge(len))
}

/// Headers, offset region and everything after the pixel offset.
struct Container {
    file_header: FileHeader,
    info_header: InfoHeader,
    offset: Vec<u8>,
    data: Vec<u8>,
}

fn read_container<R: Read>(
    mut reader: R,
    expected: Compression,
    data_section: Section,
) -> Result<Container, BmpError> {
    let mut file_bytes = [0; FileHeader::SIZE];
    read_section(&mut reader, &mut file_bytes, Section::FileHeader)?;
    let mut file_header = FileHeader::parse(&file_bytes);

    let mut info_bytes = [0; InfoHeader::SIZE];
    read_section(&mut reader, &mut info_bytes, Section::InfoHeader)?;
    let mut info_header = InfoHeader::parse(&info_bytes);

    debug!("{file_header:?}");
    debug!("{info_header:?}");
    check_validity(&file_header, &info_header, expected)?;

    let offset_len = file_header.pixel_offset as usize - HEADERS_SIZE;
    let mut offset = Vec::new();
    reader
        .by_ref()
        .take(offset_len as u64)
        .read_to_end(&mut offset)
        .map_err(|source| BmpError::Read {
            section: Section::Offset,
            source,
        })?;
    if offset.len() < offset_len {
        return Err(BmpError::Truncated {
            section: Section::Offset,
            expected: offset_len,
            found: offset.len(),
        });
    }

    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|source| BmpError::Read {
            section: data_section,
            source,
        })?;

    // trust the bytes actually read over the declared sizes
    let file_size = to_u32(HEADERS_SIZE + offset.len() + data.len())?;
    if file_header.file_size != file_size {
        info!(
            "file size field says {} bytes, read {file_size}",
            file_header.file_size
        );
        file_header.file_size = file_size;
    }
    let image_size = file_size - file_header.pixel_offset;
    if info_header.image_size != image_size {
        info!(
            "image size field says {} bytes, found {image_size}",
            info_header.image_size
        );
    }
    if expected == Compression::Rle8
        && info_header.image_size != 0
        && info_header.image_size < image_size
    {
        // data after the token stream
        data.truncate(info_header.image_size as usize);
    } else {
        info_header.image_size = image_size;
    }

    Ok(Container {
        file_header,
        info_header,
        offset,
        data,
    })
}

/// An uncompressed 8 bit palette bitmap.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bitmap {
    pub file_header: FileHeader,
    pub info_header: InfoHeader,
    /// bytes between the info header and the pixel data
    pub offset: Vec<u8>,
    /// bottom-up rows of `row_stride(width)` bytes
    pub pixels: Vec<u8>,
}

impl Bitmap {
    /// Read and validate an uncompressed bitmap.
    pub fn read_from<R: Read>(reader: R) -> Result<Bitmap, BmpError> {
        let container = read_container(reader, Compression::Rgb, Section::Pixels)?;
        let (width, height) = container.info_header.dimensions();
        let expected = image_len(width, height).ok_or(BmpError::InvalidDimensions {
            width: container.info_header.width,
            height: container.info_header.height,
        })?;
        if container.data.len() < expected {
            return Err(BmpError::Truncated {
                section: Section::Pixels,
                expected,
                found: container.data.len(),
            });
        }
        Ok(Bitmap {
            file_header: container.file_header,
            info_header: container.info_header,
            offset: container.offset,
            pixels: container.data,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Bitmap, BmpError> {
        Bitmap::read_from(bytes)
    }

    pub fn width(&self) -> usize {
        self.info_header.dimensions().0
    }

    pub fn height(&self) -> usize {
        self.info_header.dimensions().1
    }

    /// Run-length encode the pixels with `algorithm`.
    pub fn compress(&self, algorithm: Algorithm) -> Result<CompressedBitmap, BmpError> {
        let tokens = algorithm.encode(&self.pixels, self.width(), self.height())?;
        CompressedBitmap::new(self.file_header, self.info_header, self.offset.clone(), tokens)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), BmpError> {
        write_section(&mut writer, &self.file_header.to_bytes(), Section::FileHeader)?;
        write_section(&mut writer, &self.info_header.to_bytes(), Section::InfoHeader)?;
        write_section(&mut writer, &self.offset, Section::Offset)?;
        write_section(&mut writer, &self.pixels, Section::Pixels)?;
        writer.flush().map_err(|source| BmpError::Write {
            section: Section::Pixels,
            source,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADERS_SIZE + self.offset.len() + self.pixels.len());
        out.extend_from_slice(&self.file_header.to_bytes());
        out.extend_from_slice(&self.info_header.to_bytes());
        out.extend_from_slice(&self.offset);
        out.extend_from_slice(&self.pixels);
        out
    }
}

/// An 8 bit palette bitmap with run-length encoded pixels.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompressedBitmap {
    pub file_header: FileHeader,
    pub info_header: InfoHeader,
    pub offset: Vec<u8>,
    pub tokens: Vec<Token>,
}

impl CompressedBitmap {
    /// Wrap `tokens`, updating compression and the size fields.
    pub fn new(
        mut file_header: FileHeader,
        mut info_header: InfoHeader,
        offset: Vec<u8>,
        tokens: Vec<Token>,
    ) -> Result<CompressedBitmap, BmpError> {
        let image_size = to_u32(2 * tokens.len())?;
        info_header.compression = Compression::Rle8;
        info_header.image_size = image_size;
        file_header.file_size = file_header
            .pixel_offset
            .checked_add(image_size)
            .ok_or(BmpError::TooLarge(2 * tokens.len()))?;
        Ok(CompressedBitmap {
            file_header,
            info_header,
            offset,
            tokens,
        })
    }

    /// Read and validate a run-length encoded bitmap.
    pub fn read_from<R: Read>(reader: R) -> Result<CompressedBitmap, BmpError> {
        let container = read_container(reader, Compression::Rle8, Section::Tokens)?;
        Ok(CompressedBitmap {
            file_header: container.file_header,
            info_header: container.info_header,
            offset: container.offset,
            tokens: tokens_from_bytes(&container.data)?,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<CompressedBitmap, BmpError> {
        CompressedBitmap::read_from(bytes)
    }

    /// Decode back into an uncompressed bitmap.
    pub fn decompress(&self) -> Result<Bitmap, BmpError> {
        let (width, height) = self.info_header.dimensions();
        let pixels = decode(&self.tokens, width, height)?;
        let image_size = to_u32(pixels.len())?;

        let mut file_header = self.file_header;
        let mut info_header = self.info_header;
        info_header.compression = Compression::Rgb;
        info_header.image_size = image_size;
        file_header.file_size = file_header
            .pixel_offset
            .checked_add(image_size)
            .ok_or(BmpError::TooLarge(pixels.len()))?;
        Ok(Bitmap {
            file_header,
            info_header,
            offset: self.offset.clone(),
            pixels,
        })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), BmpError> {
        write_section(&mut writer, &self.file_header.to_bytes(), Section::FileHeader)?;
        write_section(&mut writer, &self.info_header.to_bytes(), Section::InfoHeader)?;
        write_section(&mut writer, &self.offset, Section::Offset)?;
        write_section(&mut writer, &tokens_to_bytes(&self.tokens), Section::Tokens)?;
        writer.flush().map_err(|source| BmpError::Write {
            section: Section::Tokens,
            source,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.file_header.file_size as usize);
        out.extend_from_slice(&self.file_header.to_bytes());
        out.extend_from_slice(&self.info_header.to_bytes());
        out.extend_from_slice(&self.offset);
        out.extend_from_slice(&tokens_to_bytes(&self.tokens));
        out
    }
}
