//! Cross-check produced files against the `image` crate's BMP decoder.

use bmprle::{
    row_stride, Algorithm, Bitmap, CompressedBitmap, Compression, FileHeader, InfoHeader, MAGIC,
};
use image::{ImageFormat, RgbImage};
use nanorand::{Rng, WyRand};

const PALETTE_SIZE: usize = 256 * 4;

fn palette() -> Vec<u8> {
    // blue, green, red, reserved
    (0..=255_u8)
        .flat_map(|i| [i, 255 - i, i.wrapping_mul(7), 0])
        .collect()
}

fn bitmap(width: usize, height: usize, pixels: Vec<u8>) -> Bitmap {
    let pixel_offset = (FileHeader::SIZE + InfoHeader::SIZE + PALETTE_SIZE) as u32;
    Bitmap {
        file_header: FileHeader {
            magic: MAGIC,
            file_size: pixel_offset + pixels.len() as u32,
            reserved1: 0,
            reserved2: 0,
            pixel_offset,
        },
        info_header: InfoHeader {
            header_size: InfoHeader::SIZE as u32,
            width: width as i32,
            height: height as i32,
            planes: 1,
            bits_per_pixel: 8,
            compression: Compression::Rgb,
            image_size: pixels.len() as u32,
            x_pixels_per_meter: 2835,
            y_pixels_per_meter: 2835,
            colors_used: 256,
            colors_important: 0,
        },
        offset: palette(),
        pixels,
    }
}

fn load(bytes: &[u8]) -> RgbImage {
    image::load_from_memory_with_format(bytes, ImageFormat::Bmp)
        .unwrap()
        .to_rgb8()
}

fn random_pixels(rng: &mut WyRand, width: usize, height: usize) -> Vec<u8> {
    let stride = row_stride(width);
    let mut pixels = Vec::with_capacity(height * stride);
    for _ in 0..height {
        let mut row = Vec::with_capacity(stride);
        while row.len() < width {
            let color = rng.generate::<u8>();
            // mix long runs, short runs and literals
            let run = match rng.generate_range(0_u8..4) {
                0 => rng.generate_range(3_usize..300),
                1 => 2,
                _ => 1,
            };
            row.resize((row.len() + run).min(width), color);
        }
        row.resize(stride, 0);
        pixels.extend_from_slice(&row);
    }
    pixels
}

#[test]
fn compressed_file_matches_original() {
    let mut rng = WyRand::new_seed(0x8B17);
    for (width, height) in [(1, 1), (13, 7), (64, 3), (301, 5), (517, 2)] {
        let original = bitmap(width, height, random_pixels(&mut rng, width, height));
        let expected = load(&original.to_bytes());
        assert_eq!(expected.dimensions(), (width as u32, height as u32));

        for algorithm in Algorithm::ALL {
            let compressed = original.compress(algorithm).unwrap();
            let bytes = compressed.to_bytes();
            assert_eq!(bytes.len(), compressed.file_header.file_size as usize);
            assert_eq!(load(&bytes), expected, "{algorithm} {width}x{height}");
        }
    }
}

#[test]
fn decompressed_file_matches_original() {
    let mut rng = WyRand::new_seed(0xD17);
    let (width, height) = (37, 11);
    let original = bitmap(width, height, random_pixels(&mut rng, width, height));
    let bytes = original.compress(Algorithm::default()).unwrap().to_bytes();

    let restored = CompressedBitmap::from_bytes(&bytes)
        .unwrap()
        .decompress()
        .unwrap();
    assert_eq!(restored, original);
    assert_eq!(load(&restored.to_bytes()), load(&original.to_bytes()));
}
