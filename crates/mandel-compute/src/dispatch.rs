//! Output buffer, argument binding and the 1-D launch.

use std::rc::Rc;

use tracing::{debug, error, info};

use crate::backend::{ComputePlatform, KernelArg};
use crate::program::{ComputeContext, ExecutionQueue, KernelEntryPoint};
use crate::status::check;
use crate::{ComputeError, ComputeResult, RenderParams};

/// Device-writable output memory.
pub struct DeviceBuffer<P: ComputePlatform> {
    raw: P::Buffer,
    bytes: usize,
    _context: Rc<ComputeContext<P>>,
}

impl<P: ComputePlatform> DeviceBuffer<P> {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn raw(&self) -> &P::Buffer {
        &self.raw
    }
}

/// Allocate the `width * height * 4` byte image buffer.
pub fn allocate_output<P: ComputePlatform>(
    context: &Rc<ComputeContext<P>>,
    params: &RenderParams,
) -> ComputeResult<DeviceBuffer<P>> {
    let bytes = params.output_bytes();
    let raw = context
        .platform()
        .create_output_buffer(context.raw(), bytes)
        .map_err(|status| {
            error!(bytes, %status, "output buffer allocation failed");
            ComputeError::BufferAllocation { bytes, status }
        })?;
    debug!(bytes, "output buffer allocated");
    Ok(DeviceBuffer { raw, bytes, _context: Rc::clone(context) })
}

fn kernel_int(name: &str, value: u32) -> ComputeResult<i32> {
    i32::try_from(value).map_err(|_| ComputeError::InvalidParams(format!("{name} {value} does not fit a kernel int")))
}

/// Bind the five parameters of `solve_mandelbrot`:
/// (0) output buffer, (1) height, (2) width, (3) max_iter, (4) max_abs.
pub fn bind_arguments<P: ComputePlatform>(
    kernel: &mut KernelEntryPoint<P>,
    buffer: &DeviceBuffer<P>,
    params: &RenderParams,
) -> ComputeResult<()> {
    let height = kernel_int("height", params.height)?;
    let width = kernel_int("width", params.width)?;

    let args = [
        (0, KernelArg::Buffer(buffer.raw())),
        (1, KernelArg::Int(height)),
        (2, KernelArg::Int(width)),
        (3, KernelArg::Int(params.max_iter)),
        (4, KernelArg::Float(params.max_abs)),
    ];
    for (index, arg) in args {
        kernel.bind(index, arg).map_err(|status| {
            error!(index, %status, "kernel argument rejected");
            ComputeError::KernelArgument { index, status }
        })?;
    }
    Ok(())
}

/// Shape of a 1-D launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    /// Work items, one per output element.
    pub global: usize,
    /// Work-group size.
    pub local: usize,
    pub groups: usize,
}

impl LaunchGeometry {
    /// Cover exactly `total` items with the largest group size that divides
    /// `total` and does not exceed `max_group`.
    pub fn for_items(total: usize, max_group: usize) -> Self {
        let cap = max_group.clamp(1, total.max(1));
        let local = (1..=cap).rev().find(|d| total % d == 0).unwrap_or(1);
        Self { global: total, local, groups: total / local }
    }
}

/// Enqueue one work item per pixel. Returns once the launch is queued.
pub fn launch<P: ComputePlatform>(
    queue: &ExecutionQueue<P>,
    kernel: &KernelEntryPoint<P>,
    params: &RenderParams,
) -> ComputeResult<LaunchGeometry> {
    let missing = kernel.unbound();
    if !missing.is_empty() {
        return Err(ComputeError::UnboundArguments { kernel: kernel.name().to_string(), missing });
    }

    let max_group = kernel.max_work_group_size()?;
    let geometry = LaunchGeometry::for_items(params.pixel_count(), max_group);
    if geometry.local * 4 < max_group.min(geometry.global) {
        debug!(local = geometry.local, max_group, "pixel count forces a small work-group size");
    }

    let platform = queue.context().platform();
    check(platform.enqueue_kernel(queue.raw(), kernel.raw(), geometry.global, geometry.local))?;
    info!(global = geometry.global, local = geometry.local, groups = geometry.groups, "kernel enqueued");
    Ok(geometry)
}
