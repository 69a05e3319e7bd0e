//! Mandelbrot escape-time kernel at two precisions.
//!
//! Both providers serve the `mandelbrot` task type; `Standard` iterates in
//! `f32`, `High` in `f64`. The scheduler picks one through the registry and
//! never sees the numeric type.

use std::marker::PhantomData;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};
use tracing::debug;

use computegrid_core::{DistributedTask, ErasedTask, Precision, TaskError, TaskProvider};

/// Task type served by this module.
pub const MANDELBROT: &str = "mandelbrot";

/// Largest slice a single task may render.
pub const MAX_PIXELS: u64 = 4_000_000;

/// A rectangular region of the complex plane sampled on a pixel grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandelbrotArgs {
    pub width: u32,
    pub height: u32,
    pub min_re: f64,
    pub max_re: f64,
    pub min_im: f64,
    pub max_im: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    200
}

/// Row-major escape counts for a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandelbrotSlice {
    pub width: u32,
    pub height: u32,
    pub precision: Precision,
    pub escape_counts: Vec<u32>,
}

impl MandelbrotArgs {
    fn validate(&self) -> Result<(), TaskError> {
        if self.width == 0 || self.height == 0 {
            return Err(TaskError::Execution("width and height must be positive".into()));
        }
        if u64::from(self.width) * u64::from(self.height) > MAX_PIXELS {
            return Err(TaskError::Execution(format!(
                "slice of {}x{} exceeds {} pixels",
                self.width, self.height, MAX_PIXELS
            )));
        }
        if self.max_iterations == 0 {
            return Err(TaskError::Execution("max_iterations must be positive".into()));
        }
        let bounds = [self.min_re, self.max_re, self.min_im, self.max_im];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(TaskError::Execution("bounds must be finite".into()));
        }
        if self.min_re > self.max_re || self.min_im > self.max_im {
            return Err(TaskError::Execution("min bound exceeds max bound".into()));
        }
        Ok(())
    }
}

/// Floating-point type the kernel iterates in.
pub trait Scalar:
    Copy
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    const PRECISION: Precision;

    fn from_f64(v: f64) -> Self;
}

impl Scalar for f32 {
    const PRECISION: Precision = Precision::Standard;

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Scalar for f64 {
    const PRECISION: Precision = Precision::High;

    fn from_f64(v: f64) -> Self {
        v
    }
}

fn escape_counts<S: Scalar>(args: &MandelbrotArgs) -> Vec<u32> {
    let two = S::from_f64(2.0);
    let four = S::from_f64(4.0);
    let min_re = S::from_f64(args.min_re);
    let min_im = S::from_f64(args.min_im);
    let re_step = S::from_f64((args.max_re - args.min_re) / f64::from(args.width.max(2) - 1));
    let im_step = S::from_f64((args.max_im - args.min_im) / f64::from(args.height.max(2) - 1));

    let mut counts = Vec::with_capacity(args.width as usize * args.height as usize);
    for y in 0..args.height {
        let ci = min_im + S::from_f64(f64::from(y)) * im_step;
        for x in 0..args.width {
            let cr = min_re + S::from_f64(f64::from(x)) * re_step;
            let (mut zr, mut zi) = (S::from_f64(0.0), S::from_f64(0.0));
            let mut iteration = 0;
            while iteration < args.max_iterations && zr * zr + zi * zi <= four {
                let next_re = zr * zr - zi * zi + cr;
                zi = two * zr * zi + ci;
                zr = next_re;
                iteration += 1;
            }
            counts.push(iteration);
        }
    }
    counts
}

/// Mandelbrot slice task iterating in `S`.
#[derive(Debug)]
pub struct MandelbrotTask<S> {
    _scalar: PhantomData<fn() -> S>,
}

impl<S> MandelbrotTask<S> {
    pub fn new() -> Self {
        Self {
            _scalar: PhantomData,
        }
    }
}

impl<S> Default for MandelbrotTask<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scalar> DistributedTask for MandelbrotTask<S> {
    type Input = MandelbrotArgs;
    type Output = MandelbrotSlice;

    fn task_type(&self) -> &str {
        MANDELBROT
    }

    fn execute(&self, args: MandelbrotArgs) -> Result<MandelbrotSlice, TaskError> {
        args.validate()?;
        let precision = S::PRECISION;
        debug!(
            width = args.width,
            height = args.height,
            precision = %precision,
            "Rendering mandelbrot slice"
        );
        Ok(MandelbrotSlice {
            width: args.width,
            height: args.height,
            precision,
            escape_counts: escape_counts::<S>(&args),
        })
    }
}

/// Provider for the `mandelbrot` task type.
#[derive(Debug, Clone, Copy)]
pub struct MandelbrotProvider {
    precision: Precision,
}

impl MandelbrotProvider {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }
}

impl TaskProvider for MandelbrotProvider {
    fn task_type(&self) -> &str {
        MANDELBROT
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn create(&self) -> Box<dyn ErasedTask> {
        match self.precision {
            Precision::Standard => Box::new(MandelbrotTask::<f32>::new()),
            Precision::High => Box::new(MandelbrotTask::<f64>::new()),
        }
    }
}
