//! Discrete hypothesis sets: orientations and translations with their priors.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::geometry::Rot3;

/// Inclusive sampling range in degrees: `start, start+step, ... <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngularRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl AngularRange {
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self { start, end, step }
    }

    /// A single sample at zero.
    pub fn fixed() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    pub fn validate(&self, axis: &'static str) -> Result<()> {
        let bad = !self.start.is_finite()
            || !self.end.is_finite()
            || !self.step.is_finite()
            || self.end < self.start
            || (self.end > self.start && self.step <= 0.0);
        if bad {
            return Err(ConfigError::AngularRange {
                axis,
                start: self.start,
                end: self.end,
                step: self.step,
            }
            .into());
        }
        Ok(())
    }

    pub fn samples(&self) -> Vec<f64> {
        if self.end <= self.start || self.step <= 0.0 {
            return vec![self.start];
        }
        // tolerate accumulated rounding at the closed end
        let n = ((self.end - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..n).map(|i| self.start + i as f64 * self.step).collect()
    }
}

/// Angular and translational search limits, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub rot: AngularRange,
    pub tilt: AngularRange,
    pub psi: AngularRange,
    /// Translations with `|t|² <= search_radius²` are searched.
    pub search_radius: f64,
}

/// All rot samples belonging to one tilt sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TiltRing {
    pub tilt: f64,
    pub nr_rot: usize,
    pub rot_step: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub rot: f64,
    pub tilt: f64,
    pub psi: f64,
    pub matrix: Rot3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translation {
    /// `[x, y, z]` in voxels.
    pub offset: [i64; 3],
    pub prior: f64,
}

impl Translation {
    pub fn as_f64(&self) -> [f64; 3] {
        [self.offset[0] as f64, self.offset[1] as f64, self.offset[2] as f64]
    }
}

/// The full (orientation × translation) hypothesis set for one iteration.
#[derive(Debug, Clone)]
pub struct HypothesisGrid {
    pub rings: Vec<TiltRing>,
    pub psis: Vec<f64>,
    pub orientations: Vec<Orientation>,
    pub translations: Vec<Translation>,
    /// Position of the zero offset in `translations`.
    pub zero_translation: usize,
    pub sigma_offset: f64,
    /// Total number of (tilt, rot) samples.
    pub nr_rot_tilt: usize,
}

impl HypothesisGrid {
    pub fn new(space: &SearchSpace, sigma_offset: f64) -> Result<Self> {
        space.rot.validate("rot")?;
        space.tilt.validate("tilt")?;
        space.psi.validate("psi")?;
        if space.search_radius < 0.0 {
            return Err(ConfigError::Negative {
                name: "search_radius",
                value: space.search_radius,
            }
            .into());
        }
        if sigma_offset < 0.0 || !sigma_offset.is_finite() {
            return Err(ConfigError::Negative {
                name: "sigma_offset",
                value: sigma_offset,
            }
            .into());
        }

        let rot_range = (space.rot.end - space.rot.start).abs();
        let rings: Vec<TiltRing> = space
            .tilt
            .samples()
            .into_iter()
            .map(|tilt| {
                let nr_rot = rot_samples(tilt, rot_range, space.rot.step);
                TiltRing {
                    tilt,
                    nr_rot,
                    rot_step: rot_range / nr_rot as f64,
                }
            })
            .collect();
        let nr_rot_tilt = rings.iter().map(|r| r.nr_rot).sum();
        let psis = space.psi.samples();

        let mut orientations = Vec::with_capacity(nr_rot_tilt * psis.len());
        for ring in &rings {
            for irot in 0..ring.nr_rot {
                let rot = space.rot.start + irot as f64 * ring.rot_step;
                for &psi in &psis {
                    orientations.push(Orientation {
                        rot,
                        tilt: ring.tilt,
                        psi,
                        matrix: Rot3::from_euler(rot, ring.tilt, psi),
                    });
                }
            }
        }

        let mut grid = Self {
            rings,
            psis,
            orientations,
            translations: Vec::new(),
            zero_translation: 0,
            sigma_offset,
            nr_rot_tilt,
        };

        if sigma_offset > 0.0 {
            let r = space.search_radius.floor() as i64;
            let r2max = space.search_radius * space.search_radius;
            for z in -r..=r {
                for y in -r..=r {
                    for x in -r..=r {
                        let r2 = (x * x + y * y + z * z) as f64;
                        if r2 <= r2max {
                            if x == 0 && y == 0 && z == 0 {
                                grid.zero_translation = grid.translations.len();
                            }
                            grid.translations.push(Translation {
                                offset: [x, y, z],
                                prior: grid.offset_prior(r2),
                            });
                        }
                    }
                }
            }
        } else {
            grid.translations.push(Translation {
                offset: [0, 0, 0],
                prior: 1.0,
            });
        }

        Ok(grid)
    }

    /// Prior density of a total offset with squared norm `r2`.
    pub fn offset_prior(&self, r2: f64) -> f64 {
        if self.sigma_offset > 0.0 {
            let s2 = self.sigma_offset * self.sigma_offset;
            (-r2 / (2.0 * s2)).exp()
                / (2.0 * PI * s2 * self.nr_rot_tilt as f64 * self.psis.len() as f64)
        } else if r2 == 0.0 {
            1.0
        } else {
            0.0
        }
    }

    /// Prior of translation `itrans` for a particle already displaced by
    /// `pre_offset`. A zero offset width pins every particle where it is.
    pub fn translation_prior(&self, itrans: usize, pre_offset: [f64; 3]) -> f64 {
        if self.sigma_offset <= 0.0 {
            return self.translations[itrans].prior;
        }
        let t = self.translations[itrans].as_f64();
        let r2 = (0..3).map(|d| (t[d] + pre_offset[d]).powi(2)).sum();
        self.offset_prior(r2)
    }

    pub fn nr_hypotheses(&self, nr_classes: usize) -> usize {
        self.orientations.len() * nr_classes * self.translations.len()
    }
}

/// Rot samples on the ring at `tilt`, proportional to its circumference.
/// The pole (tilt = 0) is a single point.
fn rot_samples(tilt: f64, rot_range: f64, rot_step: f64) -> usize {
    if tilt == 0.0 || rot_step <= 0.0 {
        return 1;
    }
    let n = (rot_range * tilt.to_radians().sin().abs() / rot_step).ceil();
    (n as usize).max(1)
}
