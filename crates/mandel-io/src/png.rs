//! PNG encoding and decoding of RGBA8 buffers.
//!
//! # Example
//!
//! ```rust,ignore
//! use mandel_io::png;
//!
//! png::write_rgba("out.png", &pixels, 640, 480)?;
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::{IoError, IoResult};

const CHANNELS: usize = 4;

fn expected_len(width: u32, height: u32) -> IoResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(CHANNELS))
        .ok_or_else(|| IoError::UnsupportedFormat(format!("{width}x{height} image is too large")))
}

fn check_len(pixels: &[u8], width: u32, height: u32) -> IoResult<()> {
    let expected = expected_len(width, height)?;
    if pixels.len() != expected {
        return Err(IoError::DimensionMismatch { expected, actual: pixels.len() });
    }
    Ok(())
}

/// Encode a row-major RGBA8 buffer as PNG into `writer`.
pub fn encode_rgba<W: Write>(writer: W, pixels: &[u8], width: u32, height: u32) -> IoResult<()> {
    check_len(pixels, width, height)?;

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::default());
    encoder.set_source_srgb(png::SrgbRenderingIntent::Perceptual);

    let mut png_writer = encoder.write_header().map_err(|e| IoError::EncodeError(e.to_string()))?;
    png_writer.write_image_data(pixels).map_err(|e| IoError::EncodeError(e.to_string()))?;
    png_writer.finish().map_err(|e| IoError::EncodeError(e.to_string()))?;

    Ok(())
}

/// Write a row-major RGBA8 buffer to a PNG file.
pub fn write_rgba<P: AsRef<Path>>(path: P, pixels: &[u8], width: u32, height: u32) -> IoResult<()> {
    let path = path.as_ref();
    check_len(pixels, width, height)?;
    let file = File::create(path)?;
    encode_rgba(BufWriter::new(file), pixels, width, height)?;
    debug!(path = %path.display(), width, height, "PNG written");
    Ok(())
}

/// Read a PNG file as RGBA8.
///
/// 8-bit RGB, grayscale and grayscale+alpha images are expanded to RGBA.
pub fn read_rgba<P: AsRef<Path>>(path: P) -> IoResult<(Vec<u8>, u32, u32)> {
    let file = File::open(path.as_ref())?;
    let decoder = png::Decoder::new(BufReader::new(file));
    let mut reader = decoder.read_info().map_err(|e| IoError::DecodeError(e.to_string()))?;

    let buf_size = reader
        .output_buffer_size()
        .ok_or_else(|| IoError::DecodeError("cannot determine output buffer size".into()))?;
    let mut buf = vec![0u8; buf_size];
    let info = reader.next_frame(&mut buf).map_err(|e| IoError::DecodeError(e.to_string()))?;
    let data = &buf[..info.buffer_size()];

    let rgba = match (info.color_type, info.bit_depth) {
        (png::ColorType::Rgba, png::BitDepth::Eight) => data.to_vec(),
        (png::ColorType::Rgb, png::BitDepth::Eight) => {
            data.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect()
        }
        (png::ColorType::Grayscale, png::BitDepth::Eight) => {
            data.iter().flat_map(|&g| [g, g, g, 255]).collect()
        }
        (png::ColorType::GrayscaleAlpha, png::BitDepth::Eight) => {
            data.chunks_exact(2).flat_map(|ga| [ga[0], ga[0], ga[0], ga[1]]).collect()
        }
        (color_type, bit_depth) => {
            return Err(IoError::UnsupportedFormat(format!("{color_type:?} {bit_depth:?}")));
        }
    };

    Ok((rgba, info.width, info.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_checked_before_encoding() {
        let mut out = Vec::new();
        let err = encode_rgba(&mut out, &[0u8; 15], 2, 2).unwrap_err();
        assert!(matches!(err, IoError::DimensionMismatch { expected: 16, actual: 15 }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_encode_in_memory() {
        let mut out = Vec::new();
        encode_rgba(&mut out, &[255u8; 3 * 3 * 4], 3, 3).unwrap();
        assert_eq!(&out[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_rgba(dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, IoError::Io(_)));
    }
}
