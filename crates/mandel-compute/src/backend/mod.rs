//! Device-layer backends.
//!
//! Provides an emulated (rayon) backend and an OpenCL backend behind one
//! trait, with automatic selection.
//!
//! # Architecture
//!
//! ```text
//! MandelbrotRun<P: ComputePlatform>
//!     +-- EmulatedPlatform (host CPU, rayon work groups)
//!     +-- OpenClPlatform   (opencl3, feature `opencl`)
//! ```
//!
//! Every raw call returns [`ClResult`]; turning a status into a fatal
//! [`crate::ComputeError`] is the caller's job (see [`crate::status::check`]).

mod detect;
pub mod emulated;

#[cfg(feature = "opencl")]
mod opencl_backend;

pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};
pub use emulated::{EmulatedConfig, EmulatedDeviceSpec, EmulatedPlatform, Fault, JournalEntry, ResourceKind};

#[cfg(feature = "opencl")]
pub use opencl_backend::OpenClPlatform;

use crate::status::ClResult;

/// Class of compute device requested from a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Gpu,
    Cpu,
}

impl DeviceClass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
        }
    }
}

/// String-valued device properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInfo {
    Name,
    Vendor,
}

/// Value bound to one kernel parameter.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Int(i32),
    Float(f32),
}

/// Raw device-layer operations of one compute platform.
///
/// Handles are released by dropping them. Callers must drop children
/// (buffers, kernels, programs, queues) before the context they came from.
pub trait ComputePlatform {
    type Device: Clone;
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Buffer;

    /// Platform name for logs.
    fn name(&self) -> String;

    /// First device of `class`; `CL_DEVICE_NOT_FOUND` when there is none.
    fn first_device(&self, class: DeviceClass) -> ClResult<Self::Device>;

    /// Two-phase string query: `None` reports the size including the NUL.
    fn device_info(&self, device: &Self::Device, info: DeviceInfo, dest: Option<&mut [u8]>) -> ClResult<usize>;

    fn create_context(&self, device: &Self::Device) -> ClResult<Self::Context>;

    /// In-order queue on `device`.
    fn create_queue(&self, context: &Self::Context, device: &Self::Device) -> ClResult<Self::Queue>;

    fn create_program(&self, context: &Self::Context, source: &str) -> ClResult<Self::Program>;

    /// Synchronous build for every device of the context.
    fn build_program(&self, program: &mut Self::Program, options: &str) -> ClResult<()>;

    /// Two-phase query of the build log for `device`.
    fn build_log(&self, program: &Self::Program, device: &Self::Device, dest: Option<&mut [u8]>) -> ClResult<usize>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> ClResult<Self::Kernel>;

    /// Number of declared kernel parameters.
    fn kernel_arg_count(&self, kernel: &Self::Kernel) -> ClResult<u32>;

    fn set_kernel_arg(&self, kernel: &mut Self::Kernel, index: u32, arg: KernelArg<'_, Self::Buffer>) -> ClResult<()>;

    /// Largest work-group size usable for `kernel` on `device`.
    fn kernel_work_group_size(&self, kernel: &Self::Kernel, device: &Self::Device) -> ClResult<usize>;

    /// Device-writable buffer of `bytes` bytes.
    fn create_output_buffer(&self, context: &Self::Context, bytes: usize) -> ClResult<Self::Buffer>;

    /// Enqueue a 1-D launch. Returns without waiting for completion.
    fn enqueue_kernel(&self, queue: &Self::Queue, kernel: &Self::Kernel, global: usize, local: usize) -> ClResult<()>;

    /// Block until all enqueued work has completed.
    fn finish(&self, queue: &Self::Queue) -> ClResult<()>;

    /// Blocking read of the whole buffer into `dest`.
    fn read_buffer(&self, queue: &Self::Queue, buffer: &Self::Buffer, dest: &mut [u8]) -> ClResult<()>;
}

/// Available backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (OpenCL > emulated).
    #[default]
    Auto,
    /// OpenCL runtime via opencl3.
    OpenCl,
    /// Host CPU emulation using rayon.
    Emulated,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Emulated => true,
            #[cfg(feature = "opencl")]
            Self::OpenCl => OpenClPlatform::is_available(),
            #[cfg(not(feature = "opencl"))]
            Self::OpenCl => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::OpenCl => "opencl",
            Self::Emulated => "emulated",
        }
    }

    /// Resolve `Auto` to a concrete backend.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => select_best_backend(),
            other => other,
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "opencl" | "cl" => Ok(Self::OpenCl),
            "emulated" | "cpu" | "host" => Ok(Self::Emulated),
            other => Err(format!("unknown backend '{other}' (expected auto, opencl or emulated)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend_names() {
        assert_eq!("auto".parse::<Backend>().unwrap(), Backend::Auto);
        assert_eq!("OpenCL".parse::<Backend>().unwrap(), Backend::OpenCl);
        assert_eq!("host".parse::<Backend>().unwrap(), Backend::Emulated);
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn auto_resolves_to_available_backend() {
        let resolved = Backend::Auto.resolve();
        assert_ne!(resolved, Backend::Auto);
        assert!(resolved.is_available());
    }
}
