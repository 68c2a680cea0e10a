//! Context, queue, program and entry-point handles.
//!
//! Children keep an `Rc` to the object they were created from, so a context
//! can never be released while a queue, program or buffer still uses it.

use std::fs;
use std::panic::Location;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info, trace};

use crate::backend::{ComputePlatform, KernelArg};
use crate::select::ComputeDevice;
use crate::status::{ClResult, check, check_build};
use crate::{ComputeError, ComputeResult};

/// Name of the kernel function every run launches.
pub const ENTRY_POINT: &str = "solve_mandelbrot";

const EMBEDDED_SOURCE: &str = include_str!("../kernels/mandelbrot.cl");

/// Kernel source text and where it came from.
#[derive(Debug, Clone)]
pub struct KernelSource {
    text: String,
    origin: String,
}

impl KernelSource {
    /// The kernel bundled with this crate.
    pub fn embedded() -> Self {
        Self { text: EMBEDDED_SOURCE.to_string(), origin: "embedded mandelbrot.cl".to_string() }
    }

    /// Read kernel source from disk. A missing or unreadable file is a
    /// [`ComputeError::SourceLoad`] located at the caller.
    #[track_caller]
    pub fn from_file(path: impl AsRef<Path>) -> ComputeResult<Self> {
        let location = Location::caller();
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| ComputeError::SourceLoad { path: path.to_path_buf(), source, location })?;
        Ok(Self { text, origin: path.display().to_string() })
    }

    pub fn from_text(text: impl Into<String>, origin: impl Into<String>) -> Self {
        Self { text: text.into(), origin: origin.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Owner of every device-side resource of a run.
pub struct ComputeContext<P: ComputePlatform> {
    raw: P::Context,
    device: ComputeDevice<P>,
    platform: Rc<P>,
}

impl<P: ComputePlatform> ComputeContext<P> {
    pub fn create(platform: Rc<P>, device: ComputeDevice<P>) -> ComputeResult<Rc<Self>> {
        let raw = check(platform.create_context(&device.id))?;
        debug!(device = %device.name, "context created");
        Ok(Rc::new(Self { raw, device, platform }))
    }

    pub fn device(&self) -> &ComputeDevice<P> {
        &self.device
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub(crate) fn raw(&self) -> &P::Context {
        &self.raw
    }
}

impl<P: ComputePlatform> Drop for ComputeContext<P> {
    fn drop(&mut self) {
        trace!(device = %self.device.name, "releasing context");
    }
}

/// In-order command queue on the context's device.
pub struct ExecutionQueue<P: ComputePlatform> {
    raw: P::Queue,
    context: Rc<ComputeContext<P>>,
}

impl<P: ComputePlatform> ExecutionQueue<P> {
    pub fn create(context: &Rc<ComputeContext<P>>) -> ComputeResult<Self> {
        let raw = check(context.platform.create_queue(&context.raw, &context.device.id))?;
        debug!("command queue created");
        Ok(Self { raw, context: Rc::clone(context) })
    }

    pub fn context(&self) -> &ComputeContext<P> {
        &self.context
    }

    pub(crate) fn raw(&self) -> &P::Queue {
        &self.raw
    }
}

/// A program built for the context's device.
pub struct CompiledProgram<P: ComputePlatform> {
    raw: P::Program,
    context: Rc<ComputeContext<P>>,
}

impl<P: ComputePlatform> CompiledProgram<P> {
    /// Create and synchronously build `source`.
    ///
    /// A compiler rejection yields [`ComputeError::BuildFailure`] with the
    /// device's build log.
    pub fn build(context: &Rc<ComputeContext<P>>, source: &KernelSource, options: &str) -> ComputeResult<Rc<Self>> {
        debug!(origin = source.origin(), "kernel source:\n{}", source.text());

        let platform = context.platform();
        let mut raw = check(platform.create_program(&context.raw, source.text()))?;
        let result = platform.build_program(&mut raw, options);
        check_build(platform, &raw, &context.device.id, result)?;

        info!(origin = source.origin(), options, "program built");
        Ok(Rc::new(Self { raw, context: Rc::clone(context) }))
    }

    /// Resolve a kernel function by name.
    pub fn entry_point(self: &Rc<Self>, name: &str) -> ComputeResult<KernelEntryPoint<P>> {
        let platform = self.context.platform();
        let raw = check(platform.create_kernel(&self.raw, name))?;
        let count = check(platform.kernel_arg_count(&raw))?;
        debug!(name, args = count, "entry point resolved");

        Ok(KernelEntryPoint {
            raw,
            name: name.to_string(),
            bound: vec![false; count as usize],
            program: Rc::clone(self),
        })
    }
}

/// A kernel function with its argument bindings.
pub struct KernelEntryPoint<P: ComputePlatform> {
    raw: P::Kernel,
    name: String,
    bound: Vec<bool>,
    program: Rc<CompiledProgram<P>>,
}

impl<P: ComputePlatform> KernelEntryPoint<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared parameters.
    pub fn arg_count(&self) -> u32 {
        self.bound.len() as u32
    }

    /// Bind one parameter by index.
    pub fn bind(&mut self, index: u32, arg: KernelArg<'_, P::Buffer>) -> ClResult<()> {
        let platform = self.program.context.platform();
        platform.set_kernel_arg(&mut self.raw, index, arg)?;
        if let Some(slot) = self.bound.get_mut(index as usize) {
            *slot = true;
        }
        trace!(kernel = %self.name, index, "argument bound");
        Ok(())
    }

    /// Indices not bound yet, ascending.
    pub fn unbound(&self) -> Vec<u32> {
        self.bound
            .iter()
            .enumerate()
            .filter(|(_, bound)| !**bound)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// The device's work-group limit for this kernel.
    pub fn max_work_group_size(&self) -> ComputeResult<usize> {
        let context = &self.program.context;
        check(context.platform().kernel_work_group_size(&self.raw, &context.device.id))
    }

    pub fn context(&self) -> &ComputeContext<P> {
        &self.program.context
    }

    pub(crate) fn raw(&self) -> &P::Kernel {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EmulatedConfig, EmulatedPlatform, JournalEntry, ResourceKind};
    use crate::select::select_device;
    use crate::status::ClStatus;
    use std::io::Write;

    fn context() -> (Rc<EmulatedPlatform>, Rc<ComputeContext<EmulatedPlatform>>) {
        let platform = Rc::new(EmulatedPlatform::new(EmulatedConfig::host()));
        let device = select_device(&*platform).unwrap();
        let context = ComputeContext::create(Rc::clone(&platform), device).unwrap();
        (platform, context)
    }

    #[test]
    fn embedded_source_declares_entry_point() {
        let source = KernelSource::embedded();
        assert!(source.text().contains(ENTRY_POINT));
    }

    #[test]
    fn builds_and_resolves_entry_point() {
        let (_platform, context) = context();
        let program = CompiledProgram::build(&context, &KernelSource::embedded(), "").unwrap();
        let kernel = program.entry_point(ENTRY_POINT).unwrap();
        assert_eq!(kernel.arg_count(), 5);
        assert_eq!(kernel.unbound(), vec![0, 1, 2, 3, 4]);
        assert!(kernel.max_work_group_size().unwrap() >= 1);
    }

    #[test]
    fn build_failure_carries_log() {
        let (platform, context) = context();
        let source = KernelSource::from_text("__kernel void solve_mandelbrot(__global uchar *image) {\n", "broken.cl");
        let err = CompiledProgram::build(&context, &source, "").err().unwrap();
        match &err {
            ComputeError::BuildFailure { log, .. } => {
                assert!(log.contains("<program source>:"), "{log}");
                assert!(log.contains("error generated"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("Caught OpenCL build error. Log:\n"));

        // The failed program object has already been released.
        let journal = platform.journal();
        assert_eq!(journal.last(), Some(&JournalEntry::Released(ResourceKind::Program)));
    }

    #[test]
    fn misnamed_entry_point() {
        let (_platform, context) = context();
        let program = CompiledProgram::build(&context, &KernelSource::embedded(), "").unwrap();
        let err = program.entry_point("solve_mandlebrot").err().unwrap();
        assert_eq!(err.cl_status(), Some(ClStatus::INVALID_KERNEL_NAME));
    }

    #[test]
    fn source_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KernelSource::embedded().text().as_bytes()).unwrap();
        let source = KernelSource::from_file(file.path()).unwrap();
        assert_eq!(source.text(), KernelSource::embedded().text());
        assert_eq!(source.origin(), file.path().display().to_string());
    }

    #[test]
    fn missing_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = KernelSource::from_file(dir.path().join("absent.cl")).unwrap_err();
        assert!(matches!(err, ComputeError::SourceLoad { .. }));
        assert_eq!(err.exit_behavior(), crate::ExitBehavior::Abort);

        let text = err.to_string();
        assert!(text.contains("program.rs:"), "{text}");
        assert!(text.contains(":Caught OpenCL build error. Log:\ncannot read kernel source "), "{text}");
        assert!(text.contains("absent.cl"));
    }
}
