use ndarray::Zip;

use crate::error::Result;
use crate::fourier::Fft3;
use crate::grid::HypothesisGrid;
use crate::model::Model;
use crate::volume::{self, Volume};

/// Real-space references after the M-step.
pub struct PostProcessed {
    /// Plain inverse transforms of the M-step references.
    pub raw: Vec<Volume>,
    /// References after solvent flattening (equal to `raw` without masks).
    pub references: Vec<Volume>,
    pub changed: bool,
}

/// Solvent flattening against a set of masks, each in `[0, 1]`.
pub struct SolventFlattening {
    masks: Vec<Volume>,
    inner: Volume,
}

impl SolventFlattening {
    pub fn new(masks: Vec<Volume>, dim: usize) -> Result<Self> {
        for (i, m) in masks.iter().enumerate() {
            volume::check_dim(format!("solvent mask {}", i + 1), m, dim)?;
        }
        Ok(Self {
            masks,
            inner: volume::spherical_mask(dim, (dim / 2) as f64),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Apply every mask in turn to all references.
    pub fn apply(&self, references: &mut [Volume]) {
        for mask in &self.masks {
            flatten(references, mask, &self.inner);
        }
    }
}

/// `v -= m · (v - solvent average)`, the average taken over all references
/// inside the sphere and weighted by the mask.
pub fn flatten(references: &mut [Volume], mask: &Volume, inner: &Volume) {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for r in references.iter() {
        Zip::from(r).and(mask).and(inner).for_each(|&v, &m, &s| {
            weighted += s * m * v;
            total += s * m;
        });
    }
    if total <= 0.0 {
        tracing::warn!("solvent mask has no weight inside the reference sphere");
        return;
    }
    let average = weighted / total;
    for r in references.iter_mut() {
        Zip::from(r).and(mask).for_each(|v, &m| *v -= m * (*v - average));
    }
}

/// Back-transform the references, flatten the solvent, and re-derive the
/// Fourier copies when anything was changed.
pub fn post_process(
    model: &mut Model,
    grid: &HypothesisGrid,
    fft: &Fft3,
    solvent: &SolventFlattening,
) -> PostProcessed {
    let raw = model.real_references(fft);
    if solvent.is_empty() {
        return PostProcessed {
            references: raw.clone(),
            raw,
            changed: false,
        };
    }

    let mut references = raw.clone();
    solvent.apply(&mut references);
    for (reference, vol) in model.references.iter_mut().zip(&references) {
        reference.reset(fft.forward(vol), grid);
    }
    PostProcessed {
        raw,
        references,
        changed: true,
    }
}
