use ndarray::Array3;

use crate::error::{ConfigError, Result};
use crate::geometry::Rot3;

/// Real-valued cubic sample array, indexed `[z, y, x]`.
pub type Volume = Array3<f64>;

/// Logical coordinate of array index `i` on an axis of length `dim`.
/// The origin sits at `dim / 2`.
#[inline]
pub fn centered(i: usize, dim: usize) -> i64 {
    i as i64 - (dim / 2) as i64
}

/// Dimension of a cubic volume, or a configuration error.
pub fn cube_dim(vol: &Volume) -> Result<usize> {
    let (z, y, x) = vol.dim();
    if z != y || y != x {
        return Err(ConfigError::NotCubic(vol.shape().to_vec()).into());
    }
    Ok(x)
}

/// Check `vol` is a cube of dimension `dim`.
pub fn check_dim(what: impl Into<String>, vol: &Volume, dim: usize) -> Result<()> {
    if vol.dim() != (dim, dim, dim) {
        return Err(ConfigError::DimensionMismatch {
            what: what.into(),
            shape: vol.shape().to_vec(),
            dim,
        }
        .into());
    }
    Ok(())
}

/// Circular shift on every axis: `out[(i + s) % n] = in[i]`.
pub fn roll<T: Clone>(a: &Array3<T>, s: usize) -> Array3<T> {
    let (nz, ny, nx) = a.dim();
    Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
        a[[
            (z + nz - s % nz) % nz,
            (y + ny - s % ny) % ny,
            (x + nx - s % nx) % nx,
        ]]
        .clone()
    })
}

/// Integer translation with periodic wrap-around, offset given as `[x, y, z]`.
pub fn translate_wrapped(vol: &Volume, offset: [i64; 3]) -> Volume {
    let (nz, ny, nx) = vol.dim();
    let wrap = |i: usize, d: i64, n: usize| -> usize {
        (i as i64 - d).rem_euclid(n as i64) as usize
    };
    Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
        vol[[wrap(z, offset[2], nz), wrap(y, offset[1], ny), wrap(x, offset[0], nx)]]
    })
}

/// Rotate the content of a cubic volume about its centered origin:
/// `out(y) = in(Aᵀ·y)`, trilinear interpolation, zero outside the cube.
pub fn rotate(vol: &Volume, a: &Rot3) -> Volume {
    let dim = vol.dim().0;
    let inv = a.transpose();
    Array3::from_shape_fn((dim, dim, dim), |(z, y, x)| {
        let p = inv.apply([
            centered(x, dim) as f64,
            centered(y, dim) as f64,
            centered(z, dim) as f64,
        ]);
        interpolate(vol, p)
    })
}

/// Trilinear sample of `vol` at centered position `[x, y, z]`.
pub fn interpolate(vol: &Volume, p: [f64; 3]) -> f64 {
    let dim = vol.dim().0;
    let half = (dim / 2) as f64;
    let fx = p[0] + half;
    let fy = p[1] + half;
    let fz = p[2] + half;

    let x0 = fx.floor();
    let y0 = fy.floor();
    let z0 = fz.floor();
    let dx = fx - x0;
    let dy = fy - y0;
    let dz = fz - z0;

    let sample = |z: f64, y: f64, x: f64| -> f64 {
        if z < 0.0 || y < 0.0 || x < 0.0 {
            return 0.0;
        }
        let (z, y, x) = (z as usize, y as usize, x as usize);
        if z >= dim || y >= dim || x >= dim {
            return 0.0;
        }
        vol[[z, y, x]]
    };

    let mut acc = 0.0;
    for (oz, wz) in [(0.0, 1.0 - dz), (1.0, dz)] {
        if wz == 0.0 {
            continue;
        }
        for (oy, wy) in [(0.0, 1.0 - dy), (1.0, dy)] {
            if wy == 0.0 {
                continue;
            }
            for (ox, wx) in [(0.0, 1.0 - dx), (1.0, dx)] {
                if wx == 0.0 {
                    continue;
                }
                acc += wz * wy * wx * sample(z0 + oz, y0 + oy, x0 + ox);
            }
        }
    }
    acc
}

/// Binary sphere of the given radius around the centered origin.
pub fn spherical_mask(dim: usize, radius: f64) -> Volume {
    let r2 = radius * radius;
    Array3::from_shape_fn((dim, dim, dim), |(z, y, x)| {
        let (cx, cy, cz) = (centered(x, dim), centered(y, dim), centered(z, dim));
        if ((cx * cx + cy * cy + cz * cz) as f64) <= r2 {
            1.0
        } else {
            0.0
        }
    })
}
