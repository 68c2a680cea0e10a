//! PNG output for rendered fractal images.
//!
//! The compute pipeline produces a flat, row-major RGBA8 buffer. This crate
//! persists it as an 8-bit RGBA PNG and reads such files back.
//!
//! ```rust,ignore
//! use mandel_io::png;
//!
//! png::write_rgba("mandelbrot.png", &pixels, 2048, 2048)?;
//! let (pixels, width, height) = png::read_rgba("mandelbrot.png")?;
//! ```

pub mod error;
pub mod png;

pub use error::{IoError, IoResult};
