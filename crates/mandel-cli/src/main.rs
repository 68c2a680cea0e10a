//! mandel - render the Mandelbrot set on an OpenCL device
//!
//! Selects a GPU (or a CPU when no GPU exists), builds the escape-time kernel,
//! runs it over every pixel and writes the image as PNG.

use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use mandel_compute::select::select_device;
use mandel_compute::{
    Backend, ComputeError, ComputePlatform, EmulatedPlatform, ExitBehavior, ImageSink, KernelSource, MandelbrotRun,
    PngSink, RenderParams, describe_backends,
};

#[derive(Parser)]
#[command(name = "mandel")]
#[command(author, version, about = "Render the Mandelbrot set on an OpenCL device")]
#[command(long_about = "
Renders the Mandelbrot set with one OpenCL work item per pixel and writes
the result as an RGBA PNG.

Examples:
  mandel                                  # 2048x2048, 350 iterations
  mandel -W 800 -H 600 -o small.png
  mandel --kernel my_kernel.cl -i 1000
  mandel --backend emulated -v            # no OpenCL runtime needed
  mandel --list-backends
")]
struct Cli {
    /// Image width in pixels
    #[arg(short = 'W', long, default_value_t = 2048)]
    width: u32,

    /// Image height in pixels
    #[arg(short = 'H', long, default_value_t = 2048)]
    height: u32,

    /// Iteration bound
    #[arg(short = 'i', long, default_value_t = 350)]
    max_iter: i32,

    /// Escape radius
    #[arg(short = 'r', long, default_value_t = 2.0)]
    max_abs: f32,

    /// Kernel source file (default: built-in mandelbrot.cl)
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Output PNG path
    #[arg(short, long, default_value = "mandelbrot.png")]
    output: PathBuf,

    /// Compute backend: auto, opencl, emulated
    #[arg(long, default_value = "auto")]
    backend: Backend,

    /// Options passed to the kernel compiler
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    build_options: String,

    /// List compute backends and exit
    #[arg(long)]
    list_backends: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Also write logs to this file
    #[arg(long)]
    log: Option<PathBuf>,
}

/// Why a run ended early.
enum Failure {
    Compute(ComputeError),
    Sink(anyhow::Error),
}

impl From<ComputeError> for Failure {
    fn from(err: ComputeError) -> Self {
        Self::Compute(err)
    }
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).try_init()?;
        return Ok(None);
    };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name().context("log path has no file name")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()?;
    Ok(Some(guard))
}

fn render<P: ComputePlatform>(platform: P, cli: &Cli, source: &KernelSource, params: RenderParams) -> Result<(), Failure> {
    let platform = Rc::new(platform);
    info!(platform = %platform.name(), "platform opened");

    let device = select_device(&*platform)?;
    println!("{}", device.banner());

    let mut run = MandelbrotRun::prepare_on(Rc::clone(&platform), device, source, &cli.build_options, params)?;
    run.execute()?;
    let image = run.retrieve()?;

    println!("Encoding image...");
    let mut sink = PngSink::new(&cli.output);
    sink.write_image(&image)
        .with_context(|| format!("failed to write {}", cli.output.display()))
        .map_err(Failure::Sink)?;

    // Device resources go only after the image is persisted.
    drop(run);
    info!(output = %cli.output.display(), "done");
    Ok(())
}

fn execute(cli: &Cli) -> Result<(), Failure> {
    let params = RenderParams {
        width: cli.width,
        height: cli.height,
        max_iter: cli.max_iter,
        max_abs: cli.max_abs,
    };
    let source = match &cli.kernel {
        Some(path) => KernelSource::from_file(path)?,
        None => KernelSource::embedded(),
    };

    let backend = cli.backend.resolve();
    info!(backend = backend.name(), "backend selected");
    match backend {
        #[cfg(feature = "opencl")]
        Backend::OpenCl => {
            let platform = mandel_compute::OpenClPlatform::first().map_err(|status| ComputeError::status(status))?;
            render(platform, cli, &source, params)
        }
        #[cfg(not(feature = "opencl"))]
        Backend::OpenCl => Err(ComputeError::BackendNotAvailable(
            "opencl (rebuild with `--features opencl`)".to_string(),
        )
        .into()),
        Backend::Auto | Backend::Emulated => render(EmulatedPlatform::default(), cli, &source, params),
    }
}

/// Print the diagnostic and end the process the way the error demands.
fn fatal(err: ComputeError, guard: Option<WorkerGuard>) -> ! {
    println!("{err}");
    drop(guard);
    match err.exit_behavior() {
        ExitBehavior::Abort => process::abort(),
        ExitBehavior::Exit(code) => process::exit(code),
    }
}

fn main() {
    let cli = Cli::parse();

    let guard = match init_logging(cli.verbose, cli.log.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {err:#}");
            process::exit(1);
        }
    };

    if cli.list_backends {
        print!("{}", describe_backends());
        return;
    }

    match execute(&cli) {
        Ok(()) => {}
        Err(Failure::Compute(err)) => fatal(err, guard),
        Err(Failure::Sink(err)) => {
            println!("error: {err:#}");
            drop(guard);
            process::exit(2);
        }
    }
}
