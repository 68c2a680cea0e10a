//! Host-side orchestration of an escape-time fractal kernel.
//!
//! Selects one compute device, builds the `solve_mandelbrot` kernel for it,
//! dispatches one work item per pixel and reads the RGBA8 image back.
//!
//! # Architecture
//!
//! ```text
//! MandelbrotRun (owns everything, drops in reverse acquisition order)
//!     +-- select::select_device     GPU, CPU on CL_DEVICE_NOT_FOUND
//!     +-- program::CompiledProgram  source -> build -> entry point
//!     +-- dispatch                  buffer, arguments, geometry, enqueue
//!     +-- retrieve                  drain, blocking read, image sink
//!             |
//!             +-- ComputePlatform trait
//!                     +-- EmulatedPlatform (rayon)
//!                     +-- OpenClPlatform   (opencl3, feature `opencl`)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use mandel_compute::{EmulatedPlatform, MandelbrotRun, RenderParams, KernelSource};
//!
//! let platform = Rc::new(EmulatedPlatform::default());
//! let image = MandelbrotRun::render(platform, &KernelSource::embedded(), "", RenderParams::default())?;
//! assert_eq!(image.pixels.len(), 2048 * 2048 * 4);
//! ```

pub mod backend;
pub mod dispatch;
pub mod info;
pub mod pipeline;
pub mod program;
pub mod retrieve;
pub mod select;
pub mod status;

pub use backend::{
    Backend, BackendInfo, ComputePlatform, DeviceClass, EmulatedConfig, EmulatedDeviceSpec, EmulatedPlatform, Fault,
    JournalEntry, ResourceKind, describe_backends, detect_backends, select_best_backend,
};
#[cfg(feature = "opencl")]
pub use backend::OpenClPlatform;
pub use dispatch::LaunchGeometry;
pub use pipeline::MandelbrotRun;
pub use program::{ENTRY_POINT, KernelSource};
pub use retrieve::{ImageSink, RenderedImage};
#[cfg(feature = "io")]
pub use retrieve::PngSink;
pub use select::ComputeDevice;
pub use status::{ClResult, ClStatus, status_name};

use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions of a run.
///
/// `Display` renders the text printed to stdout before the process ends;
/// [`ComputeError::exit_behavior`] says how it ends.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("{}:{}:Caught OpenCL error '{status}'!", .location.file(), .location.line())]
    Status { status: ClStatus, location: &'static Location<'static> },

    #[error("{}:{}:Caught OpenCL build error. Log:\n{log}", .location.file(), .location.line())]
    BuildFailure { log: String, location: &'static Location<'static> },

    #[error("Failed to allocate output memory for the kernel ({bytes} bytes): {status}")]
    BufferAllocation { bytes: usize, status: ClStatus },

    #[error("Something went wrong when setting kernel argument {index}: {status}")]
    KernelArgument { index: u32, status: ClStatus },

    #[error("Kernel '{kernel}' has unbound arguments: {missing:?}")]
    UnboundArguments { kernel: String, missing: Vec<u32> },

    /// Unreadable kernel file, reported the way a failed build is.
    #[error(
        "{}:{}:Caught OpenCL build error. Log:\ncannot read kernel source {}: {source}",
        .location.file(),
        .location.line(),
        .path.display()
    )]
    SourceLoad { path: PathBuf, source: std::io::Error, location: &'static Location<'static> },

    #[error("Invalid render parameters: {0}")]
    InvalidParams(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),
}

/// How the process ends after a [`ComputeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitBehavior {
    /// Abnormal termination (`std::process::abort`).
    Abort,
    /// Orderly exit with the given status.
    Exit(i32),
}

impl ComputeError {
    /// Status error at the caller's location.
    #[track_caller]
    pub fn status(status: ClStatus) -> Self {
        Self::Status { status, location: Location::caller() }
    }

    /// Device-layer status carried by this error, if any.
    pub fn cl_status(&self) -> Option<ClStatus> {
        match self {
            Self::Status { status, .. }
            | Self::BufferAllocation { status, .. }
            | Self::KernelArgument { status, .. } => Some(*status),
            Self::BuildFailure { .. } => Some(ClStatus::BUILD_PROGRAM_FAILURE),
            _ => None,
        }
    }

    pub fn exit_behavior(&self) -> ExitBehavior {
        match self {
            Self::Status { .. } | Self::BuildFailure { .. } | Self::SourceLoad { .. } => ExitBehavior::Abort,
            Self::BufferAllocation { .. }
            | Self::KernelArgument { .. }
            | Self::UnboundArguments { .. }
            | Self::InvalidParams(_)
            | Self::BackendNotAvailable(_) => ExitBehavior::Exit(1),
        }
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;

/// Bytes per output pixel (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Knobs of one render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    /// Iteration bound; pixels reaching it are painted black.
    pub max_iter: i32,
    /// Escape radius.
    pub max_abs: f32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self { width: 2048, height: 2048, max_iter: 350, max_abs: 2.0 }
    }
}

impl RenderParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, ..Self::default() }
    }

    pub fn with_max_iter(mut self, max_iter: i32) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_max_abs(mut self, max_abs: f32) -> Self {
        self.max_abs = max_abs;
        self
    }

    /// Number of work items, one per pixel.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of the output buffer.
    pub fn output_bytes(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }

    /// Reject parameters the kernel cannot address with `int` indices.
    pub fn validate(&self) -> ComputeResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ComputeError::InvalidParams(format!(
                "image must not be empty ({}x{})",
                self.width, self.height
            )));
        }
        let bytes = (self.width as u64) * (self.height as u64) * BYTES_PER_PIXEL as u64;
        if bytes > i32::MAX as u64 {
            return Err(ComputeError::InvalidParams(format!(
                "{}x{} needs {} bytes, more than a kernel int index can address",
                self.width, self.height, bytes
            )));
        }
        if self.max_iter < 0 {
            return Err(ComputeError::InvalidParams(format!("max_iter must be non-negative, got {}", self.max_iter)));
        }
        if !self.max_abs.is_finite() || self.max_abs <= 0.0 {
            return Err(ComputeError::InvalidParams(format!(
                "escape radius must be finite and positive, got {}",
                self.max_abs
            )));
        }
        Ok(())
    }
}
