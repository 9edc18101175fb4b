use crate::RleError;
use std::fmt;

/// One 2-byte unit of the compressed stream.
///
/// The meaning depends on `count`, see the crate documentation. Payload
/// tokens following an absolute run header reuse the same layout to
/// carry two literal bytes.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Token {
    pub count: u8,
    pub color: u8,
}

const ESCAPE: u8 = 0;
const END_OF_LINE: u8 = 0;
const END_OF_BITMAP: u8 = 1;
const DELTA: u8 = 2;

impl Token {
    pub const END_OF_LINE: Token = Token::new(ESCAPE, END_OF_LINE);
    pub const END_OF_BITMAP: Token = Token::new(ESCAPE, END_OF_BITMAP);
    pub const DELTA: Token = Token::new(ESCAPE, DELTA);

    #[inline(always)]
    pub const fn new(count: u8, color: u8) -> Token {
        Token { count, color }
    }

    /// Encoded run of `count` copies of `color`.
    #[inline(always)]
    pub fn run(count: u8, color: u8) -> Token {
        debug_assert!(count != 0);
        Token { count, color }
    }

    /// Absolute run header announcing `len` literal bytes.
    #[inline(always)]
    pub fn absolute(len: u8) -> Token {
        debug_assert!(len as usize >= crate::MIN_ABSOLUTE_RUN);
        Token::new(ESCAPE, len)
    }

    /// Pack up to two literal bytes, the missing second byte is zero.
    #[inline(always)]
    pub fn literal(pair: &[u8]) -> Token {
        debug_assert!(!pair.is_empty() && pair.len() <= 2);
        Token::new(pair[0], pair.get(1).copied().unwrap_or(0))
    }

    #[inline(always)]
    pub const fn is_escape(self) -> bool {
        self.count == ESCAPE
    }

    #[inline(always)]
    pub const fn is_end_of_line(self) -> bool {
        self.count == ESCAPE && self.color == END_OF_LINE
    }

    #[inline(always)]
    pub const fn is_end_of_bitmap(self) -> bool {
        self.count == ESCAPE && self.color == END_OF_BITMAP
    }

    /// Serialized form: `count` first, then `color`.
    #[inline(always)]
    pub const fn to_bytes(self) -> [u8; 2] {
        [self.count, self.color]
    }

    #[inline(always)]
    pub const fn from_bytes(bytes: [u8; 2]) -> Token {
        Token::new(bytes[0], bytes[1])
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.count, self.color) {
            (ESCAPE, END_OF_LINE) => f.write_str("EndOfLine"),
            (ESCAPE, END_OF_BITMAP) => f.write_str("EndOfBitmap"),
            (ESCAPE, DELTA) => f.write_str("Delta"),
            (ESCAPE, len) => f.debug_tuple("Absolute").field(&len).finish(),
            (count, color) => write!(f, "{{{count}, 0x{color:02X}}}"),
        }
    }
}

/// Serialize tokens back to back, 2 bytes each.
pub fn tokens_to_bytes(tokens: &[Token]) -> Vec<u8> {
    tokens.iter().flat_map(|token| token.to_bytes()).collect()
}

/// Split a serialized stream into tokens. The stream length must be even.
pub fn tokens_from_bytes(bytes: &[u8]) -> Result<Vec<Token>, RleError> {
    let iter = bytes.chunks_exact(2);
    if !iter.remainder().is_empty() {
        return Err(RleError::OddLength(bytes.len()));
    }
    Ok(iter.map(|pair| Token::new(pair[0], pair[1])).collect())
}
