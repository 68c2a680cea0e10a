//! Benchmarks for the mandel pipeline on the emulated platform.
//!
//! Run with: `cargo bench -p mandel-bench`

use std::hint::black_box;
use std::rc::Rc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use mandel_compute::program::{CompiledProgram, ComputeContext};
use mandel_compute::select::select_device;
use mandel_compute::{EmulatedConfig, EmulatedDeviceSpec, EmulatedPlatform, KernelSource, MandelbrotRun, RenderParams};

/// Full prepare/execute/retrieve cycle at several resolutions.
fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    group.sample_size(20);
    let source = KernelSource::embedded();

    for size in [128u32, 256, 512].iter() {
        let params = RenderParams::new(*size, *size);
        group.throughput(Throughput::Elements(params.pixel_count() as u64));

        group.bench_with_input(BenchmarkId::new("host_cpu", size), &params, |b, p| {
            let platform = Rc::new(EmulatedPlatform::default());
            b.iter(|| MandelbrotRun::render(Rc::clone(&platform), &source, "", black_box(*p)))
        });
    }

    group.finish();
}

/// Effect of the iteration bound on a fixed image.
fn bench_iterations(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterations");
    group.sample_size(20);
    let source = KernelSource::embedded();
    let platform = Rc::new(EmulatedPlatform::default());

    for max_iter in [50, 350, 1000].iter() {
        let params = RenderParams::new(256, 256).with_max_iter(*max_iter);
        group.bench_with_input(BenchmarkId::from_parameter(max_iter), &params, |b, p| {
            b.iter(|| MandelbrotRun::render(Rc::clone(&platform), &source, "", black_box(*p)))
        });
    }

    group.finish();
}

/// Work-group width with the image held constant.
fn bench_work_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_group");
    group.sample_size(20);
    let source = KernelSource::embedded();
    let params = RenderParams::new(256, 256);

    for limit in [16usize, 64, 256, 1024].iter() {
        let platform = Rc::new(EmulatedPlatform::new(
            EmulatedConfig::empty().with_device(EmulatedDeviceSpec::gpu("bench").with_max_work_group_size(*limit)),
        ));
        group.bench_with_input(BenchmarkId::from_parameter(limit), &params, |b, p| {
            b.iter(|| MandelbrotRun::render(Rc::clone(&platform), &source, "", black_box(*p)))
        });
    }

    group.finish();
}

/// Kernel source front end alone.
fn bench_build(c: &mut Criterion) {
    let platform = Rc::new(EmulatedPlatform::default());
    let source = KernelSource::embedded();

    c.bench_function("program_build", |b| {
        b.iter(|| {
            let Ok(device) = select_device(&*platform) else { return };
            let Ok(context) = ComputeContext::create(Rc::clone(&platform), device) else { return };
            let _ = black_box(CompiledProgram::build(&context, &source, ""));
        })
    });
}

criterion_group!(benches, bench_render, bench_iterations, bench_work_group, bench_build);
criterion_main!(benches);
