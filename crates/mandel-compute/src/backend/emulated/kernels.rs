//! Native implementations of entry points the emulated device can run.

use super::frontend::{KernelSignature, ParamKind};

/// Scalar kernel argument as captured at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Scalar {
    Int(i32),
    Float(f32),
}

/// A host implementation of one `__kernel` function.
///
/// `source` is the OpenCL C that `run` stands in for. The first pointer
/// parameter is the output buffer. `run` receives the remaining scalar
/// arguments in declaration order, the global id of the first item of a work
/// group and the slice of the output covering exactly that group
/// (`bytes_per_item` bytes per item).
pub(crate) struct NativeKernel {
    pub name: &'static str,
    pub source: &'static str,
    pub params: &'static [ParamKind],
    pub bytes_per_item: usize,
    pub run: fn(&[Scalar], usize, &mut [u8]),
}

static NATIVE_KERNELS: &[NativeKernel] = &[NativeKernel {
    name: "solve_mandelbrot",
    source: include_str!("../../../kernels/mandelbrot.cl"),
    params: &[ParamKind::Pointer, ParamKind::Int, ParamKind::Int, ParamKind::Int, ParamKind::Float],
    bytes_per_item: 4,
    run: solve_mandelbrot,
}];

pub(crate) fn lookup(name: &str) -> Option<&'static NativeKernel> {
    NATIVE_KERNELS.iter().find(|k| k.name == name)
}

/// The native kernel a program declaring `kernels` has to match.
pub(crate) fn reference_for(kernels: &[KernelSignature]) -> &'static NativeKernel {
    kernels.iter().find_map(|k| lookup(&k.name)).unwrap_or(&NATIVE_KERNELS[0])
}

fn solve_mandelbrot(args: &[Scalar], first: usize, out: &mut [u8]) {
    let &[Scalar::Int(height), Scalar::Int(width), Scalar::Int(max_iter), Scalar::Float(max_abs)] = args else {
        return;
    };
    if width <= 0 || height <= 0 {
        return;
    }
    let total = width as usize * height as usize;

    for (i, pixel) in out.chunks_exact_mut(4).enumerate() {
        let gid = first + i;
        if gid >= total {
            return;
        }
        pixel.copy_from_slice(&shade(gid, width, height, max_iter, max_abs));
    }
}

/// Escape-time colour of pixel `gid`, row-major over the [-2, 1] x [-1.5, 1.5] view.
fn shade(gid: usize, width: i32, height: i32, max_iter: i32, max_abs: f32) -> [u8; 4] {
    let x = (gid % width as usize) as f32;
    let y = (gid / width as usize) as f32;

    let cr = -2.0 + 3.0 * x / width as f32;
    let ci = -1.5 + 3.0 * y / height as f32;
    let limit = max_abs * max_abs;

    let (mut zr, mut zi) = (0.0f32, 0.0f32);
    let mut n = 0;
    while n < max_iter && zr * zr + zi * zi <= limit {
        let t = zr * zr - zi * zi + cr;
        zi = 2.0 * zr * zi + ci;
        zr = t;
        n += 1;
    }

    if n < max_iter {
        let t = n as f32 / max_iter as f32;
        [(255.0 * t) as u8, (255.0 * t * t) as u8, (255.0 * (1.0 - t)) as u8, 255]
    } else {
        [0, 0, 0, 255]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(width: i32, height: i32, max_iter: i32) -> Vec<Scalar> {
        vec![Scalar::Int(height), Scalar::Int(width), Scalar::Int(max_iter), Scalar::Float(2.0)]
    }

    #[test]
    fn lookup_by_name() {
        let k = lookup("solve_mandelbrot").unwrap();
        assert_eq!(k.params.len(), 5);
        assert!(lookup("solve_julia").is_none());
    }

    #[test]
    fn unknown_programs_are_held_to_the_first_kernel() {
        let julia = KernelSignature { name: "solve_julia".into(), params: vec![] };
        assert_eq!(reference_for(&[julia]).name, "solve_mandelbrot");
        assert!(reference_for(&[]).source.contains("__kernel void solve_mandelbrot("));
    }

    #[test]
    fn interior_point_is_black() {
        // Pixel (2, 2) of a 4x4 grid maps to c = -0.5 + 0i, inside the main cardioid.
        assert_eq!(shade(10, 4, 4, 50, 2.0), [0, 0, 0, 255]);
    }

    #[test]
    fn corner_escapes_immediately() {
        // c = -2 - 1.5i escapes after the first iteration.
        let px = shade(0, 4, 4, 10, 2.0);
        assert_eq!(px[3], 255);
        assert!(px[2] > 0);
    }

    #[test]
    fn zero_iterations_paint_black() {
        assert_eq!(shade(0, 4, 4, 0, 2.0), [0, 0, 0, 255]);
    }

    #[test]
    fn group_slice_is_filled() {
        let mut out = vec![0u8; 8 * 4];
        solve_mandelbrot(&args(4, 4, 10), 8, &mut out);
        assert!(out.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn items_past_image_are_skipped() {
        let mut out = vec![7u8; 4 * 4];
        solve_mandelbrot(&args(2, 1, 10), 0, &mut out);
        assert_eq!(out[3], 255);
        assert_eq!(&out[8..], &[7u8; 8]);
    }
}
