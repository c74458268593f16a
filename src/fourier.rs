//! Centered 3D Fourier transforms and spectrum-level operations.
//!
//! Spectra keep the zero frequency at index `dim / 2` on every axis, the same
//! logical origin real volumes use, so a rotation of a real volume about its
//! center is the same rotation of its spectrum about the zero frequency.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array3, Axis, Zip};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::geometry::Rot3;
use crate::volume::{self, centered, roll, Volume};

/// Complex spectrum stored as separate real and imaginary planes.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub re: Array3<f64>,
    pub im: Array3<f64>,
}

impl Spectrum {
    pub fn zeros(dim: usize) -> Self {
        Self {
            re: Array3::zeros((dim, dim, dim)),
            im: Array3::zeros((dim, dim, dim)),
        }
    }

    pub fn dim(&self) -> usize {
        self.re.dim().0
    }

    /// `self += w * other`
    pub fn add_scaled(&mut self, w: f64, other: &Spectrum) {
        self.re.scaled_add(w, &other.re);
        self.im.scaled_add(w, &other.im);
    }

    pub fn scale(&mut self, w: f64) {
        self.re *= w;
        self.im *= w;
    }

    pub fn fill_zero(&mut self) {
        self.re.fill(0.0);
        self.im.fill(0.0);
    }

    /// Spectrum of the same volume translated by `offset` (`[x, y, z]`)
    /// in real space.
    pub fn shifted(&self, offset: [f64; 3]) -> Spectrum {
        if offset == [0.0; 3] {
            return self.clone();
        }
        let dim = self.dim();
        let mut out = self.clone();
        Zip::indexed(&mut out.re)
            .and(&mut out.im)
            .for_each(|(z, y, x), re, im| {
                let k = [centered(x, dim), centered(y, dim), centered(z, dim)];
                let dot = k[0] as f64 * offset[0]
                    + k[1] as f64 * offset[1]
                    + k[2] as f64 * offset[2];
                let (s, c) = (-2.0 * PI * dot / dim as f64).sin_cos();
                let (r, i) = (*re, *im);
                *re = r * c - i * s;
                *im = r * s + i * c;
            });
        out
    }

    /// Rotate both planes about the zero frequency, see [`volume::rotate`].
    pub fn rotated(&self, a: &Rot3) -> Spectrum {
        Spectrum {
            re: volume::rotate(&self.re, a),
            im: volume::rotate(&self.im, a),
        }
    }

    fn to_complex(&self) -> Array3<Complex64> {
        let mut out = Array3::from_elem(self.re.raw_dim(), Complex64::new(0.0, 0.0));
        Zip::from(&mut out)
            .and(&self.re)
            .and(&self.im)
            .for_each(|c, &r, &i| *c = Complex64::new(r, i));
        out
    }

    fn from_complex(c: &Array3<Complex64>) -> Self {
        Self {
            re: c.mapv(|v| v.re),
            im: c.mapv(|v| v.im),
        }
    }
}

/// Forward and inverse 3D DFT plans for one cube dimension.
#[derive(Clone)]
pub struct Fft3 {
    dim: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl Fft3 {
    pub fn new(dim: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            dim,
            forward: planner.plan_fft_forward(dim),
            inverse: planner.plan_fft_inverse(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Centered spectrum of a centered real volume.
    pub fn forward(&self, vol: &Volume) -> Spectrum {
        let n = self.dim;
        let mut data = roll(vol, n - n / 2).mapv(|v| Complex64::new(v, 0.0));
        transform(&mut data, self.forward.as_ref());
        Spectrum::from_complex(&roll(&data, n / 2))
    }

    /// Real part of the inverse transform, normalized.
    pub fn inverse(&self, spec: &Spectrum) -> Volume {
        let n = self.dim;
        let mut data = roll(&spec.to_complex(), n - n / 2);
        transform(&mut data, self.inverse.as_ref());
        let norm = 1.0 / (n * n * n) as f64;
        roll(&data, n / 2).mapv(|c| c.re * norm)
    }
}

fn transform(data: &mut Array3<Complex64>, fft: &dyn Fft<f64>) {
    let n = fft.len();
    let mut buf = vec![Complex64::new(0.0, 0.0); n];
    for axis in 0..3 {
        for mut lane in data.lanes_mut(Axis(axis)) {
            for (b, v) in buf.iter_mut().zip(lane.iter()) {
                *b = *v;
            }
            fft.process(&mut buf);
            for (v, b) in lane.iter_mut().zip(buf.iter()) {
                *v = *b;
            }
        }
    }
}
