use crate::token::{tokens_to_bytes, Token};
use crate::{image_len, row_stride, RleError, MAX_RUN_LENGTH, MIN_ABSOLUTE_RUN};
use std::io;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ScanState {
    /// growing a literal span from the checkpoint
    Absolute,
    /// about to emit the run of equal bytes at the checkpoint
    Encoded,
}

#[derive(Debug, Eq, PartialEq)]
enum Emit<'a> {
    Nothing,
    Run(Token),
    Absolute(&'a [u8]),
}

#[derive(Debug, Eq, PartialEq)]
struct Transition<'a> {
    state: ScanState,
    cursor: usize,
    emit: Emit<'a>,
}

#[inline(always)]
fn starts_run(row: &[u8], at: usize) -> bool {
    at + 2 < row.len() && row[at] == row[at + 1] && row[at] == row[at + 2]
}

impl ScanState {
    /// Scan `row` from `checkpoint` and decide what to emit next.
    ///
    /// Every transition either advances the cursor or switches from
    /// `Absolute` to `Encoded` at the same position, and `Encoded` always
    /// advances, so a row is consumed in a bounded number of steps.
    fn step(self, row: &[u8], checkpoint: usize) -> Transition<'_> {
        debug_assert!(checkpoint < row.len());
        match self {
            ScanState::Absolute => {
                if starts_run(row, checkpoint) {
                    return Transition {
                        state: ScanState::Encoded,
                        cursor: checkpoint,
                        emit: Emit::Nothing,
                    };
                }
                let mut cursor = checkpoint + 1;
                while cursor < row.len()
                    && cursor - checkpoint < MAX_RUN_LENGTH
                    && !starts_run(row, cursor)
                {
                    cursor += 1;
                }
                let span = &row[checkpoint..cursor];
                if span.len() < MIN_ABSOLUTE_RUN {
                    trace!("span of {} too short, rewind to {checkpoint}", span.len());
                    Transition {
                        state: ScanState::Encoded,
                        cursor: checkpoint,
                        emit: Emit::Nothing,
                    }
                } else {
                    Transition {
                        state: ScanState::Absolute,
                        cursor,
                        emit: Emit::Absolute(span),
                    }
                }
            }
            ScanState::Encoded => {
                let value = row[checkpoint];
                let len = row[checkpoint..]
                    .iter()
                    .take(MAX_RUN_LENGTH)
                    .take_while(|&&byte| byte == value)
                    .count();
                Transition {
                    state: ScanState::Absolute,
                    cursor: checkpoint + len,
                    emit: Emit::Run(Token::run(len as u8, value)),
                }
            }
        }
    }
}

pub(crate) trait TokenSink {
    fn push(&mut self, token: Token);
}

impl TokenSink for Vec<Token> {
    #[inline(always)]
    fn push(&mut self, token: Token) {
        Vec::push(self, token);
    }
}

struct SliceSink<'a> {
    tokens: &'a mut [Token],
    len: usize,
}

impl TokenSink for SliceSink<'_> {
    #[inline(always)]
    fn push(&mut self, token: Token) {
        self.tokens[self.len] = token;
        self.len += 1;
    }
}

pub(crate) fn encode_row<S: TokenSink>(row: &[u8], sink: &mut S) -> usize {
    let mut state = ScanState::Absolute;
    let mut checkpoint = 0;
    let mut written = 0;
    while checkpoint < row.len() {
        let transition = state.step(row, checkpoint);
        trace!("{state:?} at {checkpoint}: {transition:?}");
        match transition.emit {
            Emit::Nothing => {}
            Emit::Run(token) => {
                sink.push(token);
                written += 1;
            }
            Emit::Absolute(span) => {
                sink.push(Token::absolute(span.len() as u8));
                written += 1;
                for pair in span.chunks(2) {
                    sink.push(Token::literal(pair));
                    written += 1;
                }
            }
        }
        state = transition.state;
        checkpoint = transition.cursor;
    }
    written
}

/// Upper bound of tokens produced for a `width` x `height` image.
///
/// A row needs at most `width` tokens: encoded runs cost one token per
/// run, and an absolute run of `n >= 3` bytes costs `1 + ceil(n / 2) <= n`.
/// Add `height - 1` end of line markers and the end of bitmap marker.
pub fn max_encoded_tokens(width: usize, height: usize) -> usize {
    width * height + height
}

/// Historical byte capacity for the compressed pixels of an image whose
/// uncompressed pixel data is `image_size` bytes.
///
/// Always at least `2 * max_encoded_tokens(width, height)` when
/// `image_size >= height * row_stride(width)`.
pub fn worst_case_capacity(image_size: usize, height: usize) -> usize {
    2 * image_size + 2 * height.saturating_sub(1) + 2
}

pub(crate) fn check_dimensions(width: usize, height: usize) -> Result<usize, RleError> {
    match image_len(width, height) {
        Some(len) if width > 0 && height > 0 => Ok(len),
        _ => Err(RleError::InvalidDimensions { width, height }),
    }
}

pub(crate) fn check_image(pixels: &[u8], width: usize, height: usize) -> Result<usize, RleError> {
    let expected = check_dimensions(width, height)?;
    if pixels.len() < expected {
        return Err(RleError::TooSmallInput {
            expected,
            found: pixels.len(),
        });
    }
    Ok(expected)
}

fn encode_image<S: TokenSink>(pixels: &[u8], width: usize, sink: &mut S) -> usize {
    let mut written = 0;
    for (y, row) in pixels.chunks_exact(row_stride(width)).enumerate() {
        if y > 0 {
            sink.push(Token::END_OF_LINE);
            written += 1;
        }
        let row_tokens = encode_row(&row[..width], sink);
        trace!("row {y}: {row_tokens} tokens");
        written += row_tokens;
    }
    sink.push(Token::END_OF_BITMAP);
    written + 1
}

/// Encode an image of `height` rows, each `row_stride(width)` bytes.
pub fn encode(pixels: &[u8], width: usize, height: usize) -> Result<Vec<Token>, RleError> {
    let mut tokens = Vec::new();
    encode_into(pixels, width, height, &mut tokens)?;
    Ok(tokens)
}

/// Like [`encode`] but appends to `tokens`, returns the number of tokens added.
pub fn encode_into(
    pixels: &[u8],
    width: usize,
    height: usize,
    tokens: &mut Vec<Token>,
) -> Result<usize, RleError> {
    let image_len = check_image(pixels, width, height)?;
    tokens.reserve(max_encoded_tokens(width, height));
    let written = encode_image(&pixels[..image_len], width, tokens);
    debug!("encoded {width}x{height} image into {written} tokens");
    Ok(written)
}

/// Like [`encode`] but writes into a caller provided buffer without
/// allocating. The buffer must hold [`max_encoded_tokens`] tokens.
pub fn encode_into_slice(
    pixels: &[u8],
    width: usize,
    height: usize,
    tokens: &mut [Token],
) -> Result<usize, RleError> {
    let image_len = check_image(pixels, width, height)?;
    let expected = max_encoded_tokens(width, height);
    if tokens.len() < expected {
        return Err(RleError::TooSmallOutput {
            expected,
            found: tokens.len(),
        });
    }
    let mut sink = SliceSink { tokens, len: 0 };
    let written = encode_image(&pixels[..image_len], width, &mut sink);
    debug_assert_eq!(written, sink.len);
    debug!("encoded {width}x{height} image into {written} tokens");
    Ok(written)
}

/// Streaming encoder.
///
/// Uncompressed rows, padding included, are written in through
/// [`io::Write`] in any chunking; every completed row is encoded and its
/// serialized tokens are written to the inner writer.
pub struct Rle<W> {
    width: usize,
    height: usize,
    stride: usize,
    row: Vec<u8>,
    rows: usize,
    tokens: Vec<Token>,
    written: usize,
    writer: W,
}

impl<W: io::Write> Rle<W> {
    pub fn new(writer: W, width: usize, height: usize) -> Result<Self, RleError> {
        check_dimensions(width, height)?;
        // buffers grow with the first row
        Ok(Rle {
            width,
            height,
            stride: row_stride(width),
            row: Vec::new(),
            rows: 0,
            tokens: Vec::new(),
            written: 0,
            writer,
        })
    }

    #[inline(always)]
    pub fn update(&mut self, bytes: &[u8]) -> Result<usize, RleError> {
        if self.rows == self.height {
            return Err(RleError::TooManyRows {
                height: self.height,
            });
        }
        let take = (self.stride - self.row.len()).min(bytes.len());
        self.row.extend_from_slice(&bytes[..take]);
        if self.row.len() == self.stride {
            self.encode_row()?;
        }
        Ok(take)
    }

    fn encode_row(&mut self) -> io::Result<()> {
        self.tokens.clear();
        if self.rows > 0 {
            self.tokens.push(Token::END_OF_LINE);
        }
        let row_tokens = encode_row(&self.row[..self.width], &mut self.tokens);
        trace!("row {}: {row_tokens} tokens", self.rows);
        self.writer.write_all(&tokens_to_bytes(&self.tokens))?;
        self.written += self.tokens.len();
        self.rows += 1;
        self.row.clear();
        Ok(())
    }

    pub fn finalize(mut self) -> Result<usize, RleError> {
        if self.rows != self.height {
            return Err(RleError::IncompleteImage {
                expected: self.height * self.stride,
                found: self.rows * self.stride + self.row.len(),
            });
        }
        self.writer.write_all(&Token::END_OF_BITMAP.to_bytes())?;
        self.writer.flush()?;
        self.written += 1;
        debug!(
            "encoded {}x{} image into {} tokens",
            self.width, self.height, self.written
        );
        Ok(self.written)
    }
}

impl<W: io::Write> io::Write for Rle<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let taken = self.update(rest)?;
            rest = &rest[taken..];
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{tokens_from_bytes, tokens_to_bytes};
    use nanorand::{Rng, WyRand};
    use std::io::Write;
    use std::sync::Once;

    /// (pixels with row padding, width, height, tokens)
    const TEST_VECTOR: [(&str, usize, usize, &str); 12] = [
        ("05050505", 4, 1, "04050001"),
        ("01020304", 4, 1, "0004010203040001"),
        ("0102030101000000", 5, 1, "00050102030101000001"),
        ("0707070709090909", 4, 2, "0407000004090001"),
        ("0102020203000000", 5, 1, "0101030201030001"),
        ("0102050505000000", 5, 1, "0101010203050001"),
        ("0102030303000000", 5, 1, "0101010203030001"),
        ("0101020201010202", 8, 1, "000801010202010102020001"),
        (
            "102030405050505050607000",
            11,
            1,
            "0004102030400550016001700001",
        ),
        (
            "030303aa040506bbbb0808cc",
            3,
            3,
            "0303000000030405060000000003bb0808000001",
        ),
        (
            "0101010101010000020304050607eeee",
            6,
            2,
            "0601000000060203040506070001",
        ),
        ("0909aaaa0909bbbb", 2, 2, "0209000002090001"),
    ];

    static INIT: Once = Once::new();

    /// Setup function that is only run once, even if called multiple times.
    fn setup() {
        INIT.call_once(|| {
            let _ = pretty_env_logger::try_init();
        });
    }

    fn stream(pixels: &[u8], width: usize, height: usize, chunk: usize) -> Vec<u8> {
        let mut out = vec![];
        let mut rle = Rle::new(&mut out, width, height).unwrap();
        for part in pixels.chunks(chunk) {
            rle.write_all(part).unwrap();
        }
        rle.finalize().unwrap();
        out
    }

    fn random_image(rng: &mut WyRand, width: usize, height: usize) -> Vec<u8> {
        // small alphabets produce runs, large ones literal spans
        let colors = [1_u8, 2, 3, 8, 255][rng.generate_range(0_usize..5)];
        (0..height * row_stride(width))
            .map(|_| rng.generate_range(0_u8..=colors))
            .collect()
    }

    /// Walk a stream, returns the pixels in every row and the number of
    /// end of line markers.
    fn row_lengths(tokens: &[Token]) -> (Vec<usize>, usize) {
        let mut rows = vec![0];
        let mut end_of_lines = 0;
        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            if token.is_end_of_line() {
                rows.push(0);
                end_of_lines += 1;
            } else if token.is_end_of_bitmap() {
                assert!(iter.next().is_none(), "tokens after end of bitmap");
                break;
            } else if token.is_escape() {
                let len = token.color as usize;
                assert!(len >= MIN_ABSOLUTE_RUN, "absolute run of {len}");
                let pairs = (len + 1) / 2;
                for _ in 0..pairs {
                    iter.next().expect("truncated absolute run");
                }
                *rows.last_mut().unwrap() += len;
            } else {
                *rows.last_mut().unwrap() += token.count as usize;
            }
        }
        (rows, end_of_lines)
    }

    #[test]
    fn test_rle_encode() {
        setup();
        for (input, width, height, expected) in TEST_VECTOR.into_iter() {
            let input = hex::decode(input).unwrap();
            let tokens = encode(&input, width, height).unwrap();
            assert_eq!(expected, hex::encode(tokens_to_bytes(&tokens)), "{input:02X?}");
        }
    }

    #[test]
    fn test_rle_stream() {
        setup();
        for (input, width, height, expected) in TEST_VECTOR.into_iter() {
            let input = hex::decode(input).unwrap();
            for chunk in [1, 3, 4, input.len()] {
                assert_eq!(expected, hex::encode(stream(&input, width, height, chunk)));
            }
        }
    }

    #[test]
    fn test_two_rows_single_end_of_line() {
        setup();
        let pixels = [3, 3, 3, 3, 8, 8, 8, 8];
        let tokens = encode(&pixels, 4, 2).unwrap();
        assert_eq!(
            tokens,
            [
                Token::run(4, 3),
                Token::END_OF_LINE,
                Token::run(4, 8),
                Token::END_OF_BITMAP
            ]
        );
    }

    #[test]
    fn test_zero_literals_are_not_end_of_line() {
        setup();
        let pixels = [0, 0, 5, 0, 0, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let tokens = encode(&pixels, 6, 2).unwrap();
        assert_eq!(
            tokens,
            [
                Token::absolute(6),
                Token::new(0, 0),
                Token::new(5, 0),
                Token::new(0, 6),
                Token::END_OF_LINE,
                Token::run(6, 0),
                Token::END_OF_BITMAP
            ]
        );
        assert_eq!(row_lengths(&tokens), (vec![6, 6], 1));
    }

    #[test]
    fn test_long_run_is_split() {
        setup();
        let tokens = encode(&[9; 300], 300, 1).unwrap();
        assert_eq!(
            tokens,
            [Token::run(255, 9), Token::run(45, 9), Token::END_OF_BITMAP]
        );
    }

    #[test]
    fn test_long_literal_is_capped() {
        setup();
        let mut pixels: Vec<u8> = (0..257).map(|i| i as u8).collect();
        pixels.resize(row_stride(257), 0xEE);
        let tokens = encode(&pixels, 257, 1).unwrap();
        assert_eq!(tokens[0], Token::absolute(255));
        // 255 bytes take 128 payload tokens, the last one padded
        assert_eq!(tokens[128], Token::new(254, 0));
        assert_eq!(
            tokens[129..],
            [Token::run(1, 255), Token::run(1, 0), Token::END_OF_BITMAP]
        );
    }

    #[test]
    fn test_step_transitions() {
        let row = [4, 4, 4, 1, 2, 3, 5, 5, 5, 6, 7];
        assert_eq!(
            ScanState::Absolute.step(&row, 0),
            Transition {
                state: ScanState::Encoded,
                cursor: 0,
                emit: Emit::Nothing
            }
        );
        assert_eq!(
            ScanState::Encoded.step(&row, 0),
            Transition {
                state: ScanState::Absolute,
                cursor: 3,
                emit: Emit::Run(Token::run(3, 4))
            }
        );
        assert_eq!(
            ScanState::Absolute.step(&row, 3),
            Transition {
                state: ScanState::Absolute,
                cursor: 6,
                emit: Emit::Absolute(&[1, 2, 3])
            }
        );
        // [6, 7] is too short for an absolute run
        assert_eq!(
            ScanState::Absolute.step(&row, 9),
            Transition {
                state: ScanState::Encoded,
                cursor: 9,
                emit: Emit::Nothing
            }
        );
        assert_eq!(
            ScanState::Encoded.step(&row, 9),
            Transition {
                state: ScanState::Absolute,
                cursor: 10,
                emit: Emit::Run(Token::run(1, 6))
            }
        );
    }

    #[test]
    fn test_trailing_pair_is_not_a_run() {
        let row = [1, 2, 3, 1, 1];
        assert_eq!(
            ScanState::Absolute.step(&row, 0).emit,
            Emit::Absolute(&[1, 2, 3, 1, 1])
        );
    }

    #[test]
    fn test_padding_is_ignored() {
        setup();
        let a = [1, 2, 3, 0, 0, 0, 0, 0, 9, 9, 9, 0];
        let b = [1, 2, 3, 0, 0, 0xAA, 0xBB, 0xCC, 9, 9, 9, 0x11];
        assert_eq!(encode(&a, 5, 1).unwrap(), encode(&b, 5, 1).unwrap());
        assert_eq!(encode(&a[..8], 5, 1).unwrap(), encode(&b[..8], 5, 1).unwrap());
        let c = [7, 7, 7, 0x10, 7, 7, 7, 0x20];
        let d = [7, 7, 7, 0x30, 7, 7, 7, 0x40];
        assert_eq!(encode(&c, 3, 2).unwrap(), encode(&d, 3, 2).unwrap());
    }

    #[test]
    fn test_preconditions() {
        assert!(matches!(
            encode(&[], 0, 1),
            Err(RleError::InvalidDimensions { width: 0, height: 1 })
        ));
        assert!(matches!(
            encode(&[1, 2, 3], 3, 1),
            Err(RleError::TooSmallInput {
                expected: 4,
                found: 3
            })
        ));
        let mut small = [Token::default(); 4];
        assert!(matches!(
            encode_into_slice(&[1, 2, 3, 4], 4, 1, &mut small),
            Err(RleError::TooSmallOutput {
                expected: 5,
                found: 4
            })
        ));
        assert!(Rle::new(Vec::<u8>::new(), 4, 0).is_err());
        assert!(matches!(
            encode(&[], usize::MAX - 1, 1),
            Err(RleError::InvalidDimensions { .. })
        ));
        assert!(Rle::new(Vec::<u8>::new(), usize::MAX, 1).is_err());
        // nothing is buffered before the first row arrives
        assert!(Rle::new(Vec::<u8>::new(), usize::MAX / 4, 2).is_ok());
    }

    #[test]
    fn test_stream_row_accounting() {
        let mut rle = Rle::new(Vec::<u8>::new(), 3, 2).unwrap();
        rle.write_all(&[1, 2, 3, 0]).unwrap();
        assert!(matches!(
            rle.finalize(),
            Err(RleError::IncompleteImage {
                expected: 8,
                found: 4
            })
        ));

        let mut rle = Rle::new(Vec::<u8>::new(), 3, 1).unwrap();
        rle.write_all(&[1, 2, 3, 0]).unwrap();
        assert!(rle.write_all(&[5]).is_err());
    }

    #[test]
    fn test_random_invariants() {
        setup();
        let mut rng = WyRand::new_seed(0x5EED);
        for _ in 0..300 {
            let width = rng.generate_range(1_usize..=600);
            let height = rng.generate_range(1_usize..=6);
            let pixels = random_image(&mut rng, width, height);

            let tokens = encode(&pixels, width, height).unwrap();
            assert!(tokens.len() <= max_encoded_tokens(width, height));
            assert!(
                2 * tokens.len() <= worst_case_capacity(pixels.len(), height),
                "capacity heuristic too small"
            );
            assert_eq!(tokens.last(), Some(&Token::END_OF_BITMAP));
            // literal pairs of zeros must not be counted as end of line
            assert_eq!(row_lengths(&tokens), (vec![width; height], height - 1));

            // determinism and agreement between entry points
            assert_eq!(encode(&pixels, width, height).unwrap(), tokens);
            let mut slice = vec![Token::default(); max_encoded_tokens(width, height)];
            let written = encode_into_slice(&pixels, width, height, &mut slice).unwrap();
            assert_eq!(slice[..written], tokens[..]);
            let chunk = rng.generate_range(1_usize..=64);
            let streamed = stream(&pixels, width, height, chunk);
            assert_eq!(tokens_from_bytes(&streamed).unwrap(), tokens);
        }
    }
}
