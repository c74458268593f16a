//! Missing-wedge geometry and the per-wedge index of Fourier coordinates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::volume::centered;

/// Angular span `[theta0, theta_f)` (degrees) sampled by a tilt series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissingWedge {
    pub id: i64,
    pub theta0: f64,
    pub theta_f: f64,
}

impl MissingWedge {
    /// A wedge that observes every coefficient.
    pub fn full(id: i64) -> Self {
        Self {
            id,
            theta0: -90.0,
            theta_f: 90.0,
        }
    }

    /// Whether the frequency `[x, y, z]` was recorded by the tilt series.
    ///
    /// The tilt axis is y; a coefficient is observed when the direction of
    /// its (x, z) projection, folded into [-90, 90), is inside the span.
    pub fn observes(&self, k: [i64; 3]) -> bool {
        let (x, z) = (k[0], k[2]);
        if x == 0 && z == 0 {
            return true;
        }
        let mut phi = (-(z as f64)).atan2(x as f64).to_degrees();
        if phi >= 90.0 {
            phi -= 180.0;
        } else if phi < -90.0 {
            phi += 180.0;
        }
        self.theta0 <= phi && phi < self.theta_f
    }
}

/// Shells `[min, max)` that take part in the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShellBand {
    pub min: usize,
    pub max: usize,
}

impl ShellBand {
    /// `lowres` and `highres` are fractions of the cube dimension; negative
    /// values select the defaults 0 and 0.5.
    pub fn from_resolution(dim: usize, lowres: f64, highres: f64) -> Result<Self> {
        if highres > 0.5 {
            return Err(ConfigError::ResolutionOutOfRange {
                name: "highres",
                value: highres,
            }
            .into());
        }
        if lowres > 0.5 {
            return Err(ConfigError::ResolutionOutOfRange {
                name: "lowres",
                value: lowres,
            }
            .into());
        }
        let highres = if highres < 0.0 { 0.5 } else { highres };
        let lowres = if lowres < 0.0 { 0.0 } else { lowres };
        let band = Self {
            min: (lowres * dim as f64).round() as usize,
            max: (highres * dim as f64).round() as usize,
        };
        if band.min >= band.max {
            return Err(ConfigError::EmptyResolutionBand {
                min: band.min,
                max: band.max,
            }
            .into());
        }
        Ok(band)
    }

    pub fn contains(&self, shell: usize) -> bool {
        shell >= self.min && shell < self.max
    }

    /// Length of per-shell tables: shells `0..max`.
    pub fn nr_shells(&self) -> usize {
        self.max
    }
}

/// Resolution shell of a centered frequency coordinate.
pub fn shell_of(k: [i64; 3]) -> usize {
    ((k[0] * k[0] + k[1] * k[1] + k[2] * k[2]) as f64).sqrt().round() as usize
}

/// A Fourier coefficient inside the wedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservedPoint {
    /// `[z, y, x]` array index.
    pub index: [usize; 3],
    pub shell: usize,
}

/// Observed and unobserved in-band coordinates of one wedge.
#[derive(Debug, Clone)]
pub struct WedgeIndex {
    pub wedge: MissingWedge,
    pub observed: Vec<ObservedPoint>,
    pub unobserved: Vec<[usize; 3]>,
    /// Observed coefficients per shell, indexed `0..band.max`.
    pub observed_per_shell: Vec<f64>,
}

impl WedgeIndex {
    pub fn build(wedge: MissingWedge, dim: usize, band: ShellBand) -> Self {
        let mut index = Self {
            wedge,
            observed: Vec::new(),
            unobserved: Vec::new(),
            observed_per_shell: vec![0.0; band.nr_shells()],
        };
        for z in 0..dim {
            for y in 0..dim {
                for x in 0..dim {
                    let k = [centered(x, dim), centered(y, dim), centered(z, dim)];
                    let shell = shell_of(k);
                    if !band.contains(shell) {
                        continue;
                    }
                    if wedge.observes(k) {
                        index.observed.push(ObservedPoint {
                            index: [z, y, x],
                            shell,
                        });
                        index.observed_per_shell[shell] += 1.0;
                    } else {
                        index.unobserved.push([z, y, x]);
                    }
                }
            }
        }
        index
    }
}

/// Every wedge in use, looked up by id.
#[derive(Debug, Clone)]
pub struct WedgeSet {
    indices: Vec<WedgeIndex>,
    by_id: HashMap<i64, usize>,
}

impl WedgeSet {
    /// Build all wedge indices; an empty table yields one fully sampled
    /// wedge with id 0.
    pub fn build(wedges: &[MissingWedge], dim: usize, band: ShellBand) -> Result<Self> {
        let wedges: Vec<MissingWedge> = if wedges.is_empty() {
            vec![MissingWedge::full(0)]
        } else {
            wedges.to_vec()
        };
        let mut by_id = HashMap::new();
        let mut indices = Vec::with_capacity(wedges.len());
        for w in wedges {
            if by_id.insert(w.id, indices.len()).is_some() {
                return Err(ConfigError::DuplicateWedge(w.id).into());
            }
            tracing::debug!(id = w.id, theta0 = w.theta0, theta_f = w.theta_f, "indexing wedge");
            indices.push(WedgeIndex::build(w, dim, band));
        }
        Ok(Self { indices, by_id })
    }

    pub fn get(&self, id: i64) -> Result<&WedgeIndex> {
        self.by_id
            .get(&id)
            .map(|&i| &self.indices[i])
            .ok_or_else(|| ConfigError::UnknownWedge(id).into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WedgeIndex> {
        self.indices.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn observed_and_unobserved_partition_the_band() {
        let dim = 12;
        let band = ShellBand::from_resolution(dim, 0.1, 0.45).unwrap();
        let wedge = MissingWedge {
            id: 3,
            theta0: -60.0,
            theta_f: 60.0,
        };
        let index = WedgeIndex::build(wedge, dim, band);

        let mut seen = HashSet::new();
        for p in &index.observed {
            assert!(seen.insert(p.index));
        }
        for i in &index.unobserved {
            assert!(seen.insert(*i));
        }

        let mut expected = HashSet::new();
        for z in 0..dim {
            for y in 0..dim {
                for x in 0..dim {
                    let k = [centered(x, dim), centered(y, dim), centered(z, dim)];
                    if band.contains(shell_of(k)) {
                        expected.insert([z, y, x]);
                    }
                }
            }
        }
        assert_eq!(seen, expected);
        assert!(!index.unobserved.is_empty());

        let counted: f64 = index.observed_per_shell.iter().sum();
        assert_eq!(counted as usize, index.observed.len());
        assert!(index.observed_per_shell[..band.min].iter().all(|&c| c == 0.0));
    }

    #[test]
    fn wedge_is_centrosymmetric() {
        let w = MissingWedge {
            id: 1,
            theta0: -45.0,
            theta_f: 30.0,
        };
        for k in [[1, 0, 3], [4, 2, -1], [0, 1, 2], [-3, 0, 3], [2, -2, 0]] {
            let neg = [-k[0], -k[1], -k[2]];
            assert_eq!(w.observes(k), w.observes(neg), "{:?}", k);
        }
    }

    #[test]
    fn full_wedge_observes_everything() {
        let w = MissingWedge::full(0);
        for z in -4..4 {
            for x in -4..4 {
                assert!(w.observes([x, 1, z]));
            }
        }
    }

    #[test]
    fn tilt_range_excludes_the_beam_direction() {
        let w = MissingWedge {
            id: 1,
            theta0: -60.0,
            theta_f: 60.0,
        };
        assert!(w.observes([3, 0, 0]));
        assert!(w.observes([0, 5, 0]));
        assert!(!w.observes([0, 0, 3]));
        assert!(!w.observes([1, 0, 4]));
    }

    #[test]
    fn resolution_limits_are_checked() {
        assert!(ShellBand::from_resolution(16, -1.0, 0.6).is_err());
        assert!(ShellBand::from_resolution(16, 0.51, -1.0).is_err());
        assert!(ShellBand::from_resolution(16, 0.3, 0.2).is_err());
        let band = ShellBand::from_resolution(16, -1.0, -1.0).unwrap();
        assert_eq!(band, ShellBand { min: 0, max: 8 });
    }

    #[test]
    fn unknown_and_duplicate_wedges_fail() {
        let band = ShellBand { min: 0, max: 2 };
        let w = MissingWedge::full(7);
        assert!(WedgeSet::build(&[w, w], 4, band).is_err());
        let set = WedgeSet::build(&[w], 4, band).unwrap();
        assert!(set.get(7).is_ok());
        assert!(set.get(1).is_err());
        let default = WedgeSet::build(&[], 4, band).unwrap();
        assert!(default.get(0).is_ok());
    }
}
