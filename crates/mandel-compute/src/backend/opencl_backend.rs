//! OpenCL backend using `opencl3`.

use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, CL_MEM_WRITE_ONLY, ClMem};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_device_id};
use tracing::{debug, trace, warn};

use super::{ComputePlatform, DeviceClass, DeviceInfo, KernelArg};
use crate::info::answer_info_query;
use crate::status::{ClResult, ClStatus};

fn status(e: ClError) -> ClStatus {
    ClStatus(e.0)
}

/// Program object plus the device list it builds for.
pub struct OpenClProgram {
    program: Program,
    devices: Vec<cl_device_id>,
}

/// The first installed OpenCL platform.
pub struct OpenClPlatform {
    platform: Platform,
}

impl OpenClPlatform {
    /// Whether an ICD loader reports at least one platform.
    pub fn is_available() -> bool {
        get_platforms().map(|p| !p.is_empty()).unwrap_or(false)
    }

    /// Open the first platform. Several platforms are tolerated with a warning.
    pub fn first() -> ClResult<Self> {
        let platforms = get_platforms().map_err(status)?;
        if platforms.len() > 1 {
            warn!(count = platforms.len(), "several OpenCL platforms installed, using the first");
        }
        let platform = platforms.into_iter().next().ok_or(ClStatus::PLATFORM_NOT_FOUND_KHR)?;
        debug!(name = %platform.name().unwrap_or_default(), "OpenCL platform opened");
        Ok(Self { platform })
    }
}

impl ComputePlatform for OpenClPlatform {
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = OpenClProgram;
    type Kernel = Kernel;
    type Buffer = Buffer<u8>;

    fn name(&self) -> String {
        self.platform.name().unwrap_or_else(|_| "OpenCL".to_string())
    }

    fn first_device(&self, class: DeviceClass) -> ClResult<Device> {
        let device_type = match class {
            DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        };
        let ids = self.platform.get_devices(device_type).map_err(status)?;
        ids.first().map(|&id| Device::new(id)).ok_or(ClStatus::DEVICE_NOT_FOUND)
    }

    fn device_info(&self, device: &Device, info: DeviceInfo, dest: Option<&mut [u8]>) -> ClResult<usize> {
        let value = match info {
            DeviceInfo::Name => device.name(),
            DeviceInfo::Vendor => device.vendor(),
        }
        .map_err(status)?;
        answer_info_query(value.trim_end_matches('\0'), dest)
    }

    fn create_context(&self, device: &Device) -> ClResult<Context> {
        Context::from_device(device).map_err(status)
    }

    fn create_queue(&self, context: &Context, _device: &Device) -> ClResult<CommandQueue> {
        // OpenCL 1.2 entry point; the context holds exactly one device.
        #[allow(deprecated)]
        CommandQueue::create_default(context, 0).map_err(status)
    }

    fn create_program(&self, context: &Context, source: &str) -> ClResult<OpenClProgram> {
        let program = Program::create_from_source(context, source).map_err(status)?;
        Ok(OpenClProgram { program, devices: context.devices().to_vec() })
    }

    fn build_program(&self, program: &mut OpenClProgram, options: &str) -> ClResult<()> {
        trace!(options, "clBuildProgram");
        program.program.build(&program.devices, options).map_err(status)
    }

    fn build_log(&self, program: &OpenClProgram, device: &Device, dest: Option<&mut [u8]>) -> ClResult<usize> {
        let log = program.program.get_build_log(device.id()).map_err(status)?;
        answer_info_query(log.trim_end_matches('\0'), dest)
    }

    fn create_kernel(&self, program: &OpenClProgram, name: &str) -> ClResult<Kernel> {
        Kernel::create(&program.program, name).map_err(status)
    }

    fn kernel_arg_count(&self, kernel: &Kernel) -> ClResult<u32> {
        kernel.num_args().map_err(status)
    }

    fn set_kernel_arg(&self, kernel: &mut Kernel, index: u32, arg: KernelArg<'_, Buffer<u8>>) -> ClResult<()> {
        // SAFETY: each value matches the size of the declared parameter type
        // (cl_mem, cl_int, cl_float); the driver validates index and size.
        unsafe {
            match arg {
                KernelArg::Buffer(buffer) => kernel.set_arg(index, &buffer.get()),
                KernelArg::Int(v) => kernel.set_arg(index, &v),
                KernelArg::Float(v) => kernel.set_arg(index, &v),
            }
        }
        .map_err(status)
    }

    fn kernel_work_group_size(&self, kernel: &Kernel, device: &Device) -> ClResult<usize> {
        kernel.get_work_group_size(device.id()).map_err(status)
    }

    fn create_output_buffer(&self, context: &Context, bytes: usize) -> ClResult<Buffer<u8>> {
        // SAFETY: no host pointer is supplied, the driver owns the allocation.
        unsafe { Buffer::<u8>::create(context, CL_MEM_WRITE_ONLY, bytes, ptr::null_mut()) }.map_err(status)
    }

    fn enqueue_kernel(&self, queue: &CommandQueue, kernel: &Kernel, global: usize, local: usize) -> ClResult<()> {
        let global = [global];
        let local = [local];
        // SAFETY: the size arrays outlive the call and work_dim matches their length.
        unsafe { queue.enqueue_nd_range_kernel(kernel.get(), 1, ptr::null(), global.as_ptr(), local.as_ptr(), &[]) }
            .map(drop)
            .map_err(status)
    }

    fn finish(&self, queue: &CommandQueue) -> ClResult<()> {
        queue.finish().map_err(status)
    }

    fn read_buffer(&self, queue: &CommandQueue, buffer: &Buffer<u8>, dest: &mut [u8]) -> ClResult<()> {
        // SAFETY: blocking read, `dest` stays borrowed until the copy completes.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, dest, &[]) }
            .map(drop)
            .map_err(status)
    }
}
