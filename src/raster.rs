//! Probability heat tiles: renders a square grid of per-cell scores as a
//! 256×256 RGBA PNG overlay. Hand-assembled PNG chunks over a zlib stream;
//! zlib and CRC32 both come from flate2.

use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};
use std::io::Write;

use crate::aggregate::CellProbability;

pub const TILE_SIZE: usize = 256;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Map a probability to an overlay color: green through yellow to red,
/// alpha rising with the score so empty cells stay nearly transparent.
fn probability_color(probability: f64) -> [u8; 4] {
    let p = probability.clamp(0.0, 1.0);
    let (r, g, b) = if p < 0.5 {
        // green -> yellow
        let t = p * 2.0;
        (
            (0.0 + 240.0 * t) as u8,
            (160.0 + 40.0 * t) as u8,
            (60.0 - 20.0 * t) as u8,
        )
    } else {
        // yellow -> red
        let t = (p - 0.5) * 2.0;
        (
            (240.0 - 40.0 * t) as u8,
            (200.0 - 170.0 * t) as u8,
            (40.0 - 10.0 * t) as u8,
        )
    };
    let alpha = (30.0 + 170.0 * p) as u8;
    [r, g, b, alpha]
}

/// Rasterize an `n × n` row-major score grid into a PNG tile. Cells fill
/// even pixel blocks; `scores.len()` must be `n * n`.
pub fn render_probability_tile(scores: &[CellProbability], n: usize) -> Vec<u8> {
    debug_assert_eq!(scores.len(), n * n);

    // Filter byte 0 (None) per scanline, then raw RGBA
    let mut raw = Vec::with_capacity(TILE_SIZE * (TILE_SIZE * 4 + 1));
    for py in 0..TILE_SIZE {
        raw.push(0);
        let row = (py * n / TILE_SIZE).min(n - 1);
        for px in 0..TILE_SIZE {
            let col = (px * n / TILE_SIZE).min(n - 1);
            let color = scores
                .get(row * n + col)
                .map(|cell| probability_color(cell.probability))
                .unwrap_or([0, 0, 0, 0]);
            raw.extend_from_slice(&color);
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    // Writing to a Vec cannot fail
    let _ = encoder.write_all(&raw);
    let idat = encoder.finish().unwrap_or_default();

    let mut png = Vec::with_capacity(idat.len() + 64);
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &ihdr(TILE_SIZE as u32, TILE_SIZE as u32));
    write_chunk(&mut png, b"IDAT", &idat);
    write_chunk(&mut png, b"IEND", &[]);
    png
}

fn ihdr(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(13);
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    // 8-bit RGBA, no interlace
    data.extend_from_slice(&[8, 6, 0, 0, 0]);
    data
}

fn write_chunk(png: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(kind);
    png.extend_from_slice(data);

    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    png.extend_from_slice(&crc.sum().to_be_bytes());
}
