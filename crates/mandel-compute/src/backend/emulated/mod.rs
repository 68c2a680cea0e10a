//! Host CPU emulation of the device layer.
//!
//! [`EmulatedPlatform`] implements [`ComputePlatform`] without any OpenCL
//! runtime. Source is checked by a small front-end ([`frontend`]) and must be
//! the OpenCL C of a built-in kernel, whose host implementation then runs over
//! rayon ([`kernels`]). Other source fails to build with a log pointing at the
//! OpenCL backend. The OpenCL rules a host can trip over (argument binding,
//! work sizes, buffer sizes, queue ordering) are enforced with the same status
//! codes a real driver returns.
//!
//! Every device query, acquisition, release, launch, drain and read is
//! appended to a journal, and any call can be made to fail with a chosen
//! status through [`EmulatedConfig::with_fault`].

mod frontend;
mod kernels;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use super::{ComputePlatform, DeviceClass, DeviceInfo, KernelArg};
use crate::info::answer_info_query;
use crate::status::{ClResult, ClStatus};
use frontend::{KernelSignature, ParamKind};
use kernels::{NativeKernel, Scalar};

/// Description of one emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedDeviceSpec {
    pub class: DeviceClass,
    pub name: String,
    pub vendor: String,
    pub max_work_group_size: usize,
    pub max_alloc_bytes: u64,
}

const VENDOR: &str = "mandel emulated platform";

impl EmulatedDeviceSpec {
    /// The host CPU, sized from the rayon pool and system memory.
    pub fn host_cpu() -> Self {
        // A quarter of system RAM, the OpenCL minimum for CL_DEVICE_MAX_MEM_ALLOC_SIZE.
        let max_alloc_bytes = sys_info::mem_info()
            .map(|m| m.total * 1024 / 4)
            .unwrap_or(4 * 1024 * 1024 * 1024);

        Self {
            class: DeviceClass::Cpu,
            name: format!("Host CPU ({} threads)", rayon::current_num_threads()),
            vendor: VENDOR.to_string(),
            max_work_group_size: 1024,
            max_alloc_bytes,
        }
    }

    /// A GPU-class device, executed on the host like every emulated device.
    pub fn gpu(name: impl Into<String>) -> Self {
        Self {
            class: DeviceClass::Gpu,
            name: name.into(),
            vendor: VENDOR.to_string(),
            max_work_group_size: 256,
            max_alloc_bytes: 1 << 30,
        }
    }

    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        self.max_work_group_size = size;
        self
    }

    pub fn with_max_alloc_bytes(mut self, bytes: u64) -> Self {
        self.max_alloc_bytes = bytes;
        self
    }
}

/// Call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    DeviceQuery(DeviceClass),
    CreateContext,
    CreateQueue,
    CreateProgram,
    CreateBuffer,
    SetArg(u32),
    WorkGroupQuery,
    Enqueue,
    Finish,
    ReadBuffer,
}

/// Devices and injected faults of an emulated platform.
#[derive(Debug, Clone)]
pub struct EmulatedConfig {
    pub devices: Vec<EmulatedDeviceSpec>,
    pub faults: Vec<(Fault, ClStatus)>,
}

impl EmulatedConfig {
    /// One host CPU device, no faults.
    pub fn host() -> Self {
        Self { devices: vec![EmulatedDeviceSpec::host_cpu()], faults: Vec::new() }
    }

    /// A platform that exposes no devices at all.
    pub fn empty() -> Self {
        Self { devices: Vec::new(), faults: Vec::new() }
    }

    pub fn with_device(mut self, device: EmulatedDeviceSpec) -> Self {
        self.devices.push(device);
        self
    }

    /// Make every call at `point` fail with `status`.
    pub fn with_fault(mut self, point: Fault, status: ClStatus) -> Self {
        self.faults.push((point, status));
        self
    }
}

impl Default for EmulatedConfig {
    fn default() -> Self {
        Self::host()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

/// One observable event on the emulated platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    DeviceQuery(DeviceClass),
    Acquired(ResourceKind),
    Released(ResourceKind),
    Launched { global: usize, local: usize },
    Drained { launches: usize },
    ReadBack { bytes: usize },
}

type Journal = Rc<RefCell<Vec<JournalEntry>>>;

/// Journals acquisition on creation and release on drop.
#[derive(Debug)]
struct Tracked {
    kind: ResourceKind,
    journal: Journal,
}

impl Tracked {
    fn new(kind: ResourceKind, journal: &Journal) -> Self {
        debug!(?kind, "emulated resource acquired");
        journal.borrow_mut().push(JournalEntry::Acquired(kind));
        Self { kind, journal: Rc::clone(journal) }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        debug!(kind = ?self.kind, "emulated resource released");
        self.journal.borrow_mut().push(JournalEntry::Released(self.kind));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatedDevice {
    index: usize,
}

#[derive(Debug)]
pub struct EmulatedContext {
    id: u64,
    device: EmulatedDevice,
    _tracked: Tracked,
}

struct PendingLaunch {
    native: &'static NativeKernel,
    output: Rc<RefCell<Vec<u8>>>,
    scalars: Vec<Scalar>,
    global: usize,
    local: usize,
}

pub struct EmulatedQueue {
    context: u64,
    pending: RefCell<VecDeque<PendingLaunch>>,
    _tracked: Tracked,
}

impl fmt::Debug for EmulatedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedQueue")
            .field("context", &self.context)
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

#[derive(Debug)]
pub struct EmulatedProgram {
    context: u64,
    device: EmulatedDevice,
    source: String,
    built: Option<Vec<KernelSignature>>,
    log: String,
    _tracked: Tracked,
}

#[derive(Debug, Clone)]
enum ArgValue {
    Buffer(Weak<RefCell<Vec<u8>>>),
    Int(i32),
    Float(f32),
}

pub struct EmulatedKernel {
    context: u64,
    native: &'static NativeKernel,
    args: Vec<Option<ArgValue>>,
    max_work_group_size: usize,
    _tracked: Tracked,
}

impl fmt::Debug for EmulatedKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedKernel")
            .field("context", &self.context)
            .field("name", &self.native.name)
            .field("args", &self.args)
            .field("max_work_group_size", &self.max_work_group_size)
            .finish()
    }
}

#[derive(Debug)]
pub struct EmulatedBuffer {
    context: u64,
    storage: Rc<RefCell<Vec<u8>>>,
    _tracked: Tracked,
}

impl EmulatedBuffer {
    pub fn len(&self) -> usize {
        self.storage.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Software device layer.
pub struct EmulatedPlatform {
    config: EmulatedConfig,
    journal: Journal,
    next_context: Cell<u64>,
}

impl EmulatedPlatform {
    pub fn new(config: EmulatedConfig) -> Self {
        Self { config, journal: Rc::default(), next_context: Cell::new(1) }
    }

    /// Snapshot of everything the platform has observed so far.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.borrow().clone()
    }

    /// Resources acquired and not yet released.
    pub fn live_resources(&self) -> usize {
        self.journal.borrow().iter().fold(0usize, |live, e| match e {
            JournalEntry::Acquired(_) => live + 1,
            JournalEntry::Released(_) => live.saturating_sub(1),
            _ => live,
        })
    }

    fn record(&self, entry: JournalEntry) {
        self.journal.borrow_mut().push(entry);
    }

    fn fault(&self, point: Fault) -> ClResult<()> {
        match self.config.faults.iter().find(|(p, _)| *p == point) {
            Some(&(_, status)) => {
                warn!(?point, %status, "injected fault");
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn spec(&self, device: &EmulatedDevice) -> ClResult<&EmulatedDeviceSpec> {
        self.config.devices.get(device.index).ok_or(ClStatus::INVALID_DEVICE)
    }

    /// Run every pending launch in submission order.
    fn drain(&self, queue: &EmulatedQueue) -> ClResult<usize> {
        let mut launches = 0;
        loop {
            let next = queue.pending.borrow_mut().pop_front();
            let Some(launch) = next else { break };
            execute(&launch)?;
            launches += 1;
        }
        Ok(launches)
    }
}

impl Default for EmulatedPlatform {
    fn default() -> Self {
        Self::new(EmulatedConfig::default())
    }
}

/// Execute one launch, one rayon task per work group.
fn execute(launch: &PendingLaunch) -> ClResult<()> {
    let stride = launch.native.bytes_per_item;
    let needed = launch.global.checked_mul(stride).ok_or(ClStatus::OUT_OF_RESOURCES)?;
    let mut out = launch.output.borrow_mut();
    if out.len() < needed {
        // The kernel would index past its output buffer.
        return Err(ClStatus::OUT_OF_RESOURCES);
    }

    let run = launch.native.run;
    let scalars = launch.scalars.as_slice();
    let local = launch.local;
    trace!(kernel = launch.native.name, global = launch.global, local, "executing launch");

    out[..needed]
        .par_chunks_mut(local * stride)
        .enumerate()
        .for_each(|(group, chunk)| run(scalars, group * local, chunk));
    Ok(())
}

fn options_valid(options: &str) -> bool {
    options.split_whitespace().all(|opt| opt.starts_with('-'))
}

impl ComputePlatform for EmulatedPlatform {
    type Device = EmulatedDevice;
    type Context = EmulatedContext;
    type Queue = EmulatedQueue;
    type Program = EmulatedProgram;
    type Kernel = EmulatedKernel;
    type Buffer = EmulatedBuffer;

    fn name(&self) -> String {
        "Emulated".to_string()
    }

    fn first_device(&self, class: DeviceClass) -> ClResult<EmulatedDevice> {
        self.record(JournalEntry::DeviceQuery(class));
        self.fault(Fault::DeviceQuery(class))?;
        self.config
            .devices
            .iter()
            .position(|d| d.class == class)
            .map(|index| EmulatedDevice { index })
            .ok_or(ClStatus::DEVICE_NOT_FOUND)
    }

    fn device_info(&self, device: &EmulatedDevice, info: DeviceInfo, dest: Option<&mut [u8]>) -> ClResult<usize> {
        let spec = self.spec(device)?;
        match info {
            DeviceInfo::Name => answer_info_query(&spec.name, dest),
            DeviceInfo::Vendor => answer_info_query(&spec.vendor, dest),
        }
    }

    fn create_context(&self, device: &EmulatedDevice) -> ClResult<EmulatedContext> {
        self.fault(Fault::CreateContext)?;
        self.spec(device)?;
        let id = self.next_context.get();
        self.next_context.set(id + 1);
        Ok(EmulatedContext {
            id,
            device: *device,
            _tracked: Tracked::new(ResourceKind::Context, &self.journal),
        })
    }

    fn create_queue(&self, context: &EmulatedContext, device: &EmulatedDevice) -> ClResult<EmulatedQueue> {
        self.fault(Fault::CreateQueue)?;
        if context.device != *device {
            return Err(ClStatus::INVALID_DEVICE);
        }
        Ok(EmulatedQueue {
            context: context.id,
            pending: RefCell::default(),
            _tracked: Tracked::new(ResourceKind::Queue, &self.journal),
        })
    }

    fn create_program(&self, context: &EmulatedContext, source: &str) -> ClResult<EmulatedProgram> {
        self.fault(Fault::CreateProgram)?;
        if source.is_empty() {
            return Err(ClStatus::INVALID_VALUE);
        }
        Ok(EmulatedProgram {
            context: context.id,
            device: context.device,
            source: source.to_string(),
            built: None,
            log: String::new(),
            _tracked: Tracked::new(ResourceKind::Program, &self.journal),
        })
    }

    fn build_program(&self, program: &mut EmulatedProgram, options: &str) -> ClResult<()> {
        if !options_valid(options) {
            return Err(ClStatus::INVALID_BUILD_OPTIONS);
        }
        let checked = frontend::compile(&program.source).and_then(|found| {
            let reference = kernels::reference_for(&found);
            frontend::conform(&program.source, reference.source).map_err(|d| vec![d])?;
            Ok(found)
        });
        match checked {
            Ok(kernels) => {
                debug!(kernels = kernels.len(), context = program.context, "emulated build succeeded");
                program.built = Some(kernels);
                program.log.clear();
                Ok(())
            }
            Err(diags) => {
                program.built = None;
                program.log = frontend::format_log(&diags);
                Err(ClStatus::BUILD_PROGRAM_FAILURE)
            }
        }
    }

    fn build_log(&self, program: &EmulatedProgram, device: &EmulatedDevice, dest: Option<&mut [u8]>) -> ClResult<usize> {
        if program.device != *device {
            return Err(ClStatus::INVALID_DEVICE);
        }
        answer_info_query(&program.log, dest)
    }

    fn create_kernel(&self, program: &EmulatedProgram, name: &str) -> ClResult<EmulatedKernel> {
        let built = program.built.as_ref().ok_or(ClStatus::INVALID_PROGRAM_EXECUTABLE)?;
        let signature = built.iter().find(|k| k.name == name).ok_or(ClStatus::INVALID_KERNEL_NAME)?;

        let native = kernels::lookup(name)
            .filter(|native| native.params == signature.params.as_slice())
            .ok_or(ClStatus::INVALID_KERNEL_DEFINITION)?;

        Ok(EmulatedKernel {
            context: program.context,
            native,
            args: vec![None; native.params.len()],
            max_work_group_size: self.spec(&program.device)?.max_work_group_size,
            _tracked: Tracked::new(ResourceKind::Kernel, &self.journal),
        })
    }

    fn kernel_arg_count(&self, kernel: &EmulatedKernel) -> ClResult<u32> {
        Ok(kernel.args.len() as u32)
    }

    fn set_kernel_arg(&self, kernel: &mut EmulatedKernel, index: u32, arg: KernelArg<'_, EmulatedBuffer>) -> ClResult<()> {
        self.fault(Fault::SetArg(index))?;
        let param = *kernel.native.params.get(index as usize).ok_or(ClStatus::INVALID_ARG_INDEX)?;

        let value = match (param, arg) {
            (ParamKind::Pointer, KernelArg::Buffer(buffer)) => {
                if buffer.context != kernel.context {
                    return Err(ClStatus::INVALID_MEM_OBJECT);
                }
                ArgValue::Buffer(Rc::downgrade(&buffer.storage))
            }
            (ParamKind::Int, KernelArg::Int(v)) => ArgValue::Int(v),
            (ParamKind::Float, KernelArg::Float(v)) => ArgValue::Float(v),
            _ => return Err(ClStatus::INVALID_ARG_SIZE),
        };
        kernel.args[index as usize] = Some(value);
        Ok(())
    }

    fn kernel_work_group_size(&self, kernel: &EmulatedKernel, device: &EmulatedDevice) -> ClResult<usize> {
        self.fault(Fault::WorkGroupQuery)?;
        Ok(self.spec(device)?.max_work_group_size.min(kernel.max_work_group_size))
    }

    fn create_output_buffer(&self, context: &EmulatedContext, bytes: usize) -> ClResult<EmulatedBuffer> {
        self.fault(Fault::CreateBuffer)?;
        let spec = self.spec(&context.device)?;
        if bytes == 0 || bytes as u64 > spec.max_alloc_bytes {
            return Err(ClStatus::INVALID_BUFFER_SIZE);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(bytes)
            .map_err(|_| ClStatus::MEM_OBJECT_ALLOCATION_FAILURE)?;
        storage.resize(bytes, 0);

        Ok(EmulatedBuffer {
            context: context.id,
            storage: Rc::new(RefCell::new(storage)),
            _tracked: Tracked::new(ResourceKind::Buffer, &self.journal),
        })
    }

    fn enqueue_kernel(&self, queue: &EmulatedQueue, kernel: &EmulatedKernel, global: usize, local: usize) -> ClResult<()> {
        self.fault(Fault::Enqueue)?;
        if kernel.context != queue.context {
            return Err(ClStatus::INVALID_CONTEXT);
        }
        if kernel.args.iter().any(Option::is_none) {
            return Err(ClStatus::INVALID_KERNEL_ARGS);
        }
        if global == 0 {
            return Err(ClStatus::INVALID_GLOBAL_WORK_SIZE);
        }
        if local == 0 || local > kernel.max_work_group_size || global % local != 0 {
            return Err(ClStatus::INVALID_WORK_GROUP_SIZE);
        }

        let mut output = None;
        let mut scalars = Vec::new();
        for arg in kernel.args.iter().flatten() {
            match arg {
                ArgValue::Buffer(weak) => {
                    let storage = weak.upgrade().ok_or(ClStatus::INVALID_MEM_OBJECT)?;
                    output.get_or_insert(storage);
                }
                ArgValue::Int(v) => scalars.push(Scalar::Int(*v)),
                ArgValue::Float(v) => scalars.push(Scalar::Float(*v)),
            }
        }
        let output = output.ok_or(ClStatus::INVALID_KERNEL_ARGS)?;

        queue.pending.borrow_mut().push_back(PendingLaunch {
            native: kernel.native,
            output,
            scalars,
            global,
            local,
        });
        self.record(JournalEntry::Launched { global, local });
        trace!(kernel = kernel.native.name, global, local, "launch enqueued");
        Ok(())
    }

    fn finish(&self, queue: &EmulatedQueue) -> ClResult<()> {
        self.fault(Fault::Finish)?;
        let launches = self.drain(queue)?;
        self.record(JournalEntry::Drained { launches });
        Ok(())
    }

    fn read_buffer(&self, queue: &EmulatedQueue, buffer: &EmulatedBuffer, dest: &mut [u8]) -> ClResult<()> {
        self.fault(Fault::ReadBuffer)?;
        if buffer.context != queue.context {
            return Err(ClStatus::INVALID_CONTEXT);
        }

        // A blocking read waits for every command enqueued before it.
        let launches = self.drain(queue)?;
        if launches > 0 {
            self.record(JournalEntry::Drained { launches });
        }

        let storage = buffer.storage.borrow();
        if dest.len() > storage.len() {
            return Err(ClStatus::INVALID_VALUE);
        }
        dest.copy_from_slice(&storage[..dest.len()]);
        self.record(JournalEntry::ReadBack { bytes: dest.len() });
        Ok(())
    }
}
