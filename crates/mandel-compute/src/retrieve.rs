//! Drain, blocking read-back and the image sink.

use tracing::{debug, info};

use crate::backend::ComputePlatform;
use crate::dispatch::DeviceBuffer;
use crate::program::ExecutionQueue;
use crate::status::check;
use crate::{BYTES_PER_PIXEL, ComputeResult};

/// Host copy of the rendered image, row-major RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RenderedImage {
    /// RGBA of pixel (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.pixels.get(at..at + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Consumer of a finished image.
pub trait ImageSink {
    type Error;

    fn write_image(&mut self, image: &RenderedImage) -> Result<(), Self::Error>;
}

/// Block until every enqueued command has completed.
pub fn drain<P: ComputePlatform>(queue: &ExecutionQueue<P>) -> ComputeResult<()> {
    check(queue.context().platform().finish(queue.raw()))?;
    debug!("queue drained");
    Ok(())
}

/// Blocking read of the whole output buffer.
pub fn read_back<P: ComputePlatform>(
    queue: &ExecutionQueue<P>,
    buffer: &DeviceBuffer<P>,
    width: u32,
    height: u32,
) -> ComputeResult<RenderedImage> {
    let mut pixels = vec![0u8; buffer.bytes()];
    check(queue.context().platform().read_buffer(queue.raw(), buffer.raw(), &mut pixels))?;
    info!(bytes = pixels.len(), "image read back");
    Ok(RenderedImage { pixels, width, height })
}

/// Writes the image as a PNG file.
#[cfg(feature = "io")]
pub struct PngSink {
    path: std::path::PathBuf,
}

#[cfg(feature = "io")]
impl PngSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(feature = "io")]
impl ImageSink for PngSink {
    type Error = mandel_io::IoError;

    fn write_image(&mut self, image: &RenderedImage) -> Result<(), Self::Error> {
        mandel_io::png::write_rgba(&self.path, &image.pixels, image.width, image.height)?;
        info!(path = %self.path.display(), "image written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_lookup() {
        let image = RenderedImage { pixels: (0..32).collect(), width: 4, height: 2 };
        assert_eq!(image.pixel(0, 0), Some([0, 1, 2, 3]));
        assert_eq!(image.pixel(1, 1), Some([20, 21, 22, 23]));
        assert_eq!(image.pixel(4, 0), None);
        assert_eq!(image.pixel(0, 2), None);
    }

    #[cfg(feature = "io")]
    #[test]
    fn png_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let image = RenderedImage { pixels: vec![200; 3 * 2 * 4], width: 3, height: 2 };

        let mut sink = PngSink::new(&path);
        sink.write_image(&image).unwrap();

        let (pixels, w, h) = mandel_io::png::read_rgba(&path).unwrap();
        assert_eq!((w, h), (3, 2));
        assert_eq!(pixels, image.pixels);
    }
}
