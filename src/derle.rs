use crate::token::Token;
use crate::rle::check_dimensions;
use crate::{row_stride, RleError, FILL_BYTE};
use std::io;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Pending {
    Token,
    Literal { remaining: usize },
    Delta,
}

/// Streaming decoder.
///
/// Serialized tokens are written in through [`io::Write`], or passed one
/// by one to [`DeRle::update`]. Each completed row is written to the
/// inner writer as `row_stride(width)` bytes. Row padding and pixels
/// skipped by a delta or an early end of bitmap are [`FILL_BYTE`].
pub struct DeRle<W> {
    width: usize,
    height: usize,
    stride: usize,
    row: Vec<u8>,
    y: usize,
    pending: Pending,
    half: Option<u8>,
    finished: bool,
    writer: W,
}

impl<W: io::Write> DeRle<W> {
    pub fn new(writer: W, width: usize, height: usize) -> Result<Self, RleError> {
        check_dimensions(width, height)?;
        Ok(DeRle {
            width,
            height,
            stride: row_stride(width),
            row: Vec::new(),
            y: 0,
            pending: Pending::Token,
            half: None,
            finished: false,
            writer,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline(always)]
    pub fn update(&mut self, token: Token) -> Result<(), RleError> {
        if self.finished {
            return Err(RleError::TrailingData);
        }
        trace!("decode {token:?}, pending: {:?}", self.pending);
        match self.pending {
            Pending::Literal { remaining } => {
                let pair = token.to_bytes();
                let take = remaining.min(2);
                self.row.extend_from_slice(&pair[..take]);
                self.pending = if remaining > 2 {
                    Pending::Literal {
                        remaining: remaining - 2,
                    }
                } else {
                    Pending::Token
                };
            }
            Pending::Delta => {
                self.pending = Pending::Token;
                self.skip(token.count as usize, token.color as usize)?;
            }
            Pending::Token if !token.is_escape() => {
                let count = token.count as usize;
                self.check_room(count)?;
                self.row.resize(self.row.len() + count, token.color);
            }
            Pending::Token => match token.color {
                0 => self.end_row()?,
                1 => self.finish()?,
                2 => self.pending = Pending::Delta,
                len => {
                    let remaining = len as usize;
                    self.check_room(remaining)?;
                    self.pending = Pending::Literal { remaining };
                }
            },
        }
        Ok(())
    }

    fn check_room(&self, run: usize) -> Result<(), RleError> {
        if self.y >= self.height {
            return Err(RleError::TooManyRows {
                height: self.height,
            });
        }
        if self.row.len() + run > self.width {
            return Err(RleError::RowOverflow {
                row: self.y,
                column: self.row.len(),
                run,
                width: self.width,
            });
        }
        Ok(())
    }

    fn end_row(&mut self) -> io::Result<()> {
        if self.y >= self.height {
            warn!("end of line after the last row");
            return Ok(());
        }
        self.row.resize(self.stride, FILL_BYTE);
        self.writer.write_all(&self.row)?;
        self.row.clear();
        self.y += 1;
        Ok(())
    }

    /// Move `right` columns and `up` rows, filling what is skipped.
    fn skip(&mut self, right: usize, up: usize) -> Result<(), RleError> {
        let column = self.row.len();
        for _ in 0..up {
            self.end_row()?;
        }
        let target = column + right;
        if target > self.row.len() {
            self.check_room(target - self.row.len())?;
            self.row.resize(target, FILL_BYTE);
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.y < self.height && (self.y + 1 < self.height || self.row.len() < self.width) {
            debug!(
                "end of bitmap at row {} column {}, filling the rest",
                self.y,
                self.row.len()
            );
        }
        while self.y < self.height {
            self.end_row()?;
        }
        self.finished = true;
        self.writer.flush()
    }

    pub fn finalize(self) -> Result<W, RleError> {
        if self.half.is_some() || self.pending != Pending::Token {
            return Err(RleError::Truncated);
        }
        if !self.finished {
            return Err(RleError::MissingEndOfBitmap);
        }
        Ok(self.writer)
    }
}

impl<W: io::Write> io::Write for DeRle<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            match self.half.take() {
                Some(first) => self.update(Token::new(first, byte))?,
                None => self.half = Some(byte),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Decode tokens into `height` rows of `row_stride(width)` bytes.
///
/// Decoding stops at the end of bitmap marker, anything after it is
/// ignored.
pub fn decode(tokens: &[Token], width: usize, height: usize) -> Result<Vec<u8>, RleError> {
    let len = check_dimensions(width, height)?;
    let mut derle = DeRle::new(Vec::new(), width, height)?;
    for token in tokens {
        if derle.pending == Pending::Token && token.is_end_of_bitmap() {
            // fills every remaining row at once
            let rest = len - derle.writer.len();
            derle
                .writer
                .try_reserve_exact(rest)
                .map_err(|_| RleError::OutputTooLarge(len))?;
        }
        derle.update(*token)?;
        if derle.is_finished() {
            break;
        }
    }
    derle.finalize()
}
