//! One complete render, from device selection to host image.

use std::rc::Rc;

use tracing::{debug, info};

use crate::backend::ComputePlatform;
use crate::dispatch::{self, DeviceBuffer, LaunchGeometry};
use crate::program::{CompiledProgram, ComputeContext, ENTRY_POINT, ExecutionQueue, KernelEntryPoint, KernelSource};
use crate::retrieve::{self, RenderedImage};
use crate::select::{ComputeDevice, select_device};
use crate::{ComputeResult, RenderParams};

/// Every resource of one render.
///
/// Fields drop top to bottom, the reverse of acquisition: buffer, kernel
/// (and the program it holds), queue, context. The same order applies to
/// the locals of [`MandelbrotRun::prepare_on`] when it returns early.
pub struct MandelbrotRun<P: ComputePlatform> {
    buffer: DeviceBuffer<P>,
    kernel: KernelEntryPoint<P>,
    queue: ExecutionQueue<P>,
    context: Rc<ComputeContext<P>>,
    params: RenderParams,
    geometry: Option<LaunchGeometry>,
}

impl<P: ComputePlatform> MandelbrotRun<P> {
    /// Select a device and prepare a run on it.
    pub fn prepare(
        platform: Rc<P>,
        source: &KernelSource,
        build_options: &str,
        params: RenderParams,
    ) -> ComputeResult<Self> {
        let device = select_device(&*platform)?;
        Self::prepare_on(platform, device, source, build_options, params)
    }

    /// Create the context and queue, build the program, allocate the output
    /// and bind every kernel argument.
    pub fn prepare_on(
        platform: Rc<P>,
        device: ComputeDevice<P>,
        source: &KernelSource,
        build_options: &str,
        params: RenderParams,
    ) -> ComputeResult<Self> {
        params.validate()?;

        let context = ComputeContext::create(platform, device)?;
        let queue = ExecutionQueue::create(&context)?;
        let program = CompiledProgram::build(&context, source, build_options)?;
        let mut kernel = program.entry_point(ENTRY_POINT)?;
        drop(program);

        let buffer = dispatch::allocate_output(&context, &params)?;
        dispatch::bind_arguments(&mut kernel, &buffer, &params)?;
        debug!(width = params.width, height = params.height, "run prepared");

        Ok(Self { buffer, kernel, queue, context, params, geometry: None })
    }

    /// Enqueue the kernel over every pixel.
    pub fn execute(&mut self) -> ComputeResult<LaunchGeometry> {
        let geometry = dispatch::launch(&self.queue, &self.kernel, &self.params)?;
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// Drain the queue and read the image back.
    pub fn retrieve(&self) -> ComputeResult<RenderedImage> {
        retrieve::drain(&self.queue)?;
        retrieve::read_back(&self.queue, &self.buffer, self.params.width, self.params.height)
    }

    /// Prepare, execute and retrieve, releasing everything before returning.
    pub fn render(
        platform: Rc<P>,
        source: &KernelSource,
        build_options: &str,
        params: RenderParams,
    ) -> ComputeResult<RenderedImage> {
        let mut run = Self::prepare(platform, source, build_options, params)?;
        run.execute()?;
        let image = run.retrieve()?;
        info!(device = %run.device().name, bytes = image.pixels.len(), "render complete");
        Ok(image)
    }

    pub fn device(&self) -> &ComputeDevice<P> {
        self.context.device()
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    /// Geometry of the last launch, if any.
    pub fn geometry(&self) -> Option<LaunchGeometry> {
        self.geometry
    }

    pub fn output_bytes(&self) -> usize {
        self.buffer.bytes()
    }
}
