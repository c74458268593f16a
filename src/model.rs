use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::fourier::{Fft3, Spectrum};
use crate::geometry::EulerAngles;
use crate::grid::HypothesisGrid;
use crate::volume::{self, Volume};

/// One class: its zero-shift spectrum and a translated copy per
/// translation hypothesis of the current grid.
#[derive(Debug, Clone)]
pub struct Reference {
    shifted: Vec<Spectrum>,
    zero: usize,
}

impl Reference {
    pub fn from_spectrum(spectrum: Spectrum, grid: &HypothesisGrid) -> Self {
        let shifted = grid
            .translations
            .iter()
            .map(|t| spectrum.shifted(t.as_f64()))
            .collect();
        Self {
            shifted,
            zero: grid.zero_translation,
        }
    }

    pub fn zero_shift(&self) -> &Spectrum {
        &self.shifted[self.zero]
    }

    /// Copy translated by translation hypothesis `itrans`.
    pub fn shifted(&self, itrans: usize) -> &Spectrum {
        &self.shifted[itrans]
    }

    /// Replace the zero-shift spectrum and regenerate every translated copy.
    pub fn reset(&mut self, spectrum: Spectrum, grid: &HypothesisGrid) {
        *self = Self::from_spectrum(spectrum, grid);
    }
}

/// Model parameters shared by every particle during one E-step sweep.
#[derive(Debug, Clone)]
pub struct Model {
    pub references: Vec<Reference>,
    /// Mixture fractions, summing to one.
    pub fractions: Vec<f64>,
    /// Noise variance per resolution shell.
    pub sigma2: Vec<f64>,
    pub sigma_offset: f64,
}

impl Model {
    pub fn new(
        references: &[Volume],
        fft: &Fft3,
        grid: &HypothesisGrid,
        fractions: Option<Vec<f64>>,
        sigma2: Vec<f64>,
    ) -> Result<Self> {
        if references.is_empty() {
            return Err(ConfigError::Invalid("at least one reference is required".into()).into());
        }
        for (i, r) in references.iter().enumerate() {
            volume::check_dim(format!("reference {}", i + 1), r, fft.dim())?;
        }
        let fractions = match fractions {
            Some(f) => normalize_fractions(f, references.len())?,
            None => vec![1.0 / references.len() as f64; references.len()],
        };
        Ok(Self {
            references: references
                .iter()
                .map(|r| Reference::from_spectrum(fft.forward(r), grid))
                .collect(),
            fractions,
            sigma2,
            sigma_offset: grid.sigma_offset,
        })
    }

    pub fn nr_classes(&self) -> usize {
        self.references.len()
    }

    /// Zero-shift references back in real space.
    pub fn real_references(&self, fft: &Fft3) -> Vec<Volume> {
        self.references
            .iter()
            .map(|r| fft.inverse(r.zero_shift()))
            .collect()
    }
}

/// Rescale a user-supplied fraction table to sum to one.
pub fn normalize_fractions(mut fractions: Vec<f64>, nr_classes: usize) -> Result<Vec<f64>> {
    if fractions.len() != nr_classes {
        return Err(ConfigError::TableLength {
            what: "fraction table",
            found: fractions.len(),
            expected: nr_classes,
        }
        .into());
    }
    if fractions.iter().any(|f| *f < 0.0 || !f.is_finite()) {
        return Err(ConfigError::Invalid("model fractions must be non-negative".into()).into());
    }
    let sum: f64 = fractions.iter().sum();
    if sum <= 0.0 {
        return Err(ConfigError::Invalid("model fractions sum to zero".into()).into());
    }
    if (sum - 1.0).abs() > 1e-4 {
        tracing::warn!(sum, "model fractions do not sum to one, rescaling");
    }
    for f in &mut fractions {
        *f /= sum;
    }
    Ok(fractions)
}

/// A sub-volume and its running alignment.
#[derive(Debug, Clone)]
pub struct Particle {
    pub name: String,
    pub volume: Volume,
    pub wedge: i64,
    pub angles: EulerAngles,
    /// `[x, y, z]`, integer valued.
    pub offset: [f64; 3],
    pub fit: ParticleFit,
}

impl Particle {
    pub fn new(name: impl Into<String>, volume: Volume) -> Self {
        Self {
            name: name.into(),
            volume,
            wedge: 0,
            angles: EulerAngles::default(),
            offset: [0.0; 3],
            fit: ParticleFit::default(),
        }
    }

    pub fn with_wedge(mut self, wedge: i64) -> Self {
        self.wedge = wedge;
        self
    }

    pub fn with_alignment(mut self, angles: EulerAngles, offset: [f64; 3]) -> Self {
        self.angles = angles;
        self.offset = offset.map(f64::round);
        self
    }
}

/// Latest E-step outcome of a particle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleFit {
    /// Zero-based optimal class, `None` before the first iteration.
    pub class: Option<usize>,
    /// Normalized weight of the best hypothesis.
    pub max_weight: f64,
    pub log_likelihood: f64,
    pub responsibilities: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{AngularRange, SearchSpace};

    fn grid(radius: f64) -> HypothesisGrid {
        let space = SearchSpace {
            rot: AngularRange::fixed(),
            tilt: AngularRange::fixed(),
            psi: AngularRange::fixed(),
            search_radius: radius,
        };
        HypothesisGrid::new(&space, 1.0).unwrap()
    }

    #[test]
    fn fractions_are_normalized() {
        let f = normalize_fractions(vec![2.0, 6.0], 2).unwrap();
        assert_eq!(f, vec![0.25, 0.75]);
        assert!(normalize_fractions(vec![1.0], 2).is_err());
        assert!(normalize_fractions(vec![0.0, 0.0], 2).is_err());
    }

    #[test]
    fn reference_keeps_one_copy_per_translation() {
        let fft = Fft3::new(4);
        let g = grid(1.0);
        let mut vol = Volume::zeros((4, 4, 4));
        vol[[2, 2, 3]] = 1.0;
        let model = Model::new(&[vol.clone()], &fft, &g, None, vec![0.0; 2]).unwrap();
        let r = &model.references[0];
        assert_eq!(r.shifted.len(), g.translations.len());
        assert_eq!(r.zero_shift(), &fft.forward(&vol));
        assert_eq!(model.fractions, vec![1.0]);

        let back = model.real_references(&fft);
        assert!((back[0][[2, 2, 3]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_wrong_reference_size() {
        let fft = Fft3::new(4);
        let vol = Volume::zeros((5, 5, 5));
        assert!(Model::new(&[vol], &fft, &grid(0.0), None, vec![]).is_err());
    }
}
