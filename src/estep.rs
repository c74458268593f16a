//! Expectation step for a single particle.
//!
//! The work runs as five sequential stages, each consuming the previous
//! stage's result: [`shift_prep`], [`score_all`], [`normalize`],
//! [`accumulate`] and [`report`]. Only `accumulate` writes, and only into the
//! caller's [`Accumulators`]; the model snapshot is read-only throughout.

use crate::accum::{add_into, Accumulators};
use crate::error::{NumericalError, Result};
use crate::fourier::{Fft3, Spectrum};
use crate::geometry::{EulerAngles, Rot3};
use crate::grid::HypothesisGrid;
use crate::model::{Model, Particle};
use crate::volume::{self, Volume};
use crate::wedge::{WedgeIndex, WedgeSet};

/// Hypotheses below this fraction of the best weight are not accumulated.
pub const SIGNIFICANT_WEIGHT_LOW: f64 = 1e-8;

/// `exp(-x)` is taken as zero beyond this.
pub const UNDERFLOW_LIMIT: f64 = 1000.0;

/// Read-only state shared by all particles of one sweep.
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    pub model: &'a Model,
    pub grid: &'a HypothesisGrid,
    pub wedges: &'a WedgeSet,
    pub fft: &'a Fft3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hypothesis {
    pub orientation: usize,
    pub class: usize,
    pub translation: usize,
}

/// Particle spectrum restricted to its wedge, one copy per translation.
pub struct ShiftedParticle {
    pub spectra: Vec<Spectrum>,
}

#[derive(Debug, Clone)]
pub struct Score {
    pub hypothesis: Hypothesis,
    /// Negative log-likelihood up to a constant.
    pub diff: f64,
    /// Raw squared residual per shell.
    pub shell_residuals: Vec<f64>,
}

pub struct Scores {
    pub entries: Vec<Score>,
    pub min_diff: f64,
}

pub struct Weights {
    /// Unnormalized weight per entry of [`Scores::entries`].
    pub weights: Vec<f64>,
    pub sum: f64,
    pub best: usize,
    pub max_weight: f64,
    /// Normalized responsibility per class, summing to one.
    pub class_responsibilities: Vec<f64>,
}

/// Point estimate and fit quality of one particle.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleOutcome {
    pub class: usize,
    /// Optimal orientation composed with the pre-orientation.
    pub angles: EulerAngles,
    /// Optimal translation relative to the pre-translation.
    pub translation: [f64; 3],
    /// Best hypothesis weight over the sum of all weights.
    pub max_weight: f64,
    pub log_likelihood: f64,
    pub responsibilities: Vec<f64>,
}

/// Run all five stages for `particle`, adding its contribution to `acc`.
pub fn expectation(
    particle: &Particle,
    snap: &Snapshot<'_>,
    acc: &mut Accumulators,
) -> Result<ParticleOutcome> {
    let wedge = snap.wedges.get(particle.wedge)?;
    let pre_rotation = particle.angles.matrix();
    let volume = volume::translate_wrapped(&particle.volume, particle.offset.map(|v| v as i64));

    let shifted = shift_prep(&volume, wedge, snap.grid, snap.fft);
    let scores = score_all(&shifted, &pre_rotation, wedge, snap);
    let weights = normalize(&scores, snap, particle.offset, &particle.name)?;
    accumulate(&shifted, &scores, &weights, &pre_rotation, particle.offset, wedge, snap, acc);
    let outcome = report(&scores, &weights, &pre_rotation, snap.grid);

    tracing::debug!(
        particle = %particle.name,
        class = outcome.class + 1,
        rot = outcome.angles.rot,
        tilt = outcome.angles.tilt,
        psi = outcome.angles.psi,
        max_weight = outcome.max_weight,
        "particle aligned"
    );
    Ok(outcome)
}

/// Transform, force the wedge, and translate the particle spectrum.
pub fn shift_prep(
    volume: &Volume,
    wedge: &WedgeIndex,
    grid: &HypothesisGrid,
    fft: &Fft3,
) -> ShiftedParticle {
    let full = fft.forward(volume);
    let mut masked = Spectrum::zeros(fft.dim());
    for p in &wedge.observed {
        masked.re[p.index] = full.re[p.index];
        masked.im[p.index] = full.im[p.index];
    }
    ShiftedParticle {
        spectra: grid
            .translations
            .iter()
            .map(|t| masked.shifted(t.as_f64()))
            .collect(),
    }
}

/// Score every (orientation, class, translation) against the rotated
/// references over the observed coefficients of the wedge.
pub fn score_all(
    shifted: &ShiftedParticle,
    pre_rotation: &Rot3,
    wedge: &WedgeIndex,
    snap: &Snapshot<'_>,
) -> Scores {
    let model = snap.model;
    let nr_shells = model.sigma2.len();
    // shells without a noise estimate carry no likelihood information
    let inv_two_sigma2: Vec<f64> = model
        .sigma2
        .iter()
        .map(|&s| if s > 0.0 { 1.0 / (2.0 * s) } else { 0.0 })
        .collect();

    let mut entries = Vec::with_capacity(snap.grid.nr_hypotheses(model.nr_classes()));
    let mut min_diff = f64::INFINITY;

    for (iorient, orientation) in snap.grid.orientations.iter().enumerate() {
        let a = orientation.matrix * *pre_rotation;
        for (class, reference) in model.references.iter().enumerate() {
            if model.fractions[class] <= 0.0 {
                continue;
            }
            let rotated = reference.zero_shift().rotated(&a);
            for (itrans, spectrum) in shifted.spectra.iter().enumerate() {
                let mut diff = 0.0;
                let mut shell_residuals = vec![0.0; nr_shells];
                for p in &wedge.observed {
                    let dr = spectrum.re[p.index] - rotated.re[p.index];
                    let di = spectrum.im[p.index] - rotated.im[p.index];
                    let d2 = dr * dr + di * di;
                    shell_residuals[p.shell] += d2;
                    diff += d2 * inv_two_sigma2[p.shell];
                }
                if diff < min_diff {
                    min_diff = diff;
                }
                entries.push(Score {
                    hypothesis: Hypothesis {
                        orientation: iorient,
                        class,
                        translation: itrans,
                    },
                    diff,
                    shell_residuals,
                });
            }
        }
    }

    Scores { entries, min_diff }
}

/// Turn scores into weights relative to the best score.
pub fn normalize(
    scores: &Scores,
    snap: &Snapshot<'_>,
    pre_offset: [f64; 3],
    name: &str,
) -> Result<Weights> {
    let model = snap.model;
    let mut weights = Vec::with_capacity(scores.entries.len());
    let mut class_weights = vec![0.0; model.nr_classes()];
    let mut sum = 0.0;
    let mut best = 0;
    let mut max_weight = 0.0;

    for (i, score) in scores.entries.iter().enumerate() {
        let h = score.hypothesis;
        let w = hypothesis_weight(
            score.diff - scores.min_diff,
            model.fractions[h.class],
            snap.grid.translation_prior(h.translation, pre_offset),
        );
        weights.push(w);
        class_weights[h.class] += w;
        sum += w;
        if w > max_weight {
            max_weight = w;
            best = i;
        }
    }

    if !(sum > 0.0 && sum.is_finite()) {
        return Err(NumericalError::ZeroParticleWeight(name.to_string()).into());
    }
    for w in &mut class_weights {
        *w /= sum;
    }

    Ok(Weights {
        weights,
        sum,
        best,
        max_weight,
        class_responsibilities: class_weights,
    })
}

/// `exp(-delta) * fraction * prior`, zero once `delta` is past the
/// underflow limit.
pub fn hypothesis_weight(delta: f64, fraction: f64, prior: f64) -> f64 {
    if delta.is_nan() || delta > UNDERFLOW_LIMIT {
        0.0
    } else {
        (-delta).exp() * fraction * prior
    }
}

/// Fold the significant hypotheses into the accumulators.
#[allow(clippy::too_many_arguments)]
pub fn accumulate(
    shifted: &ShiftedParticle,
    scores: &Scores,
    weights: &Weights,
    pre_rotation: &Rot3,
    pre_offset: [f64; 3],
    wedge: &WedgeIndex,
    snap: &Snapshot<'_>,
    acc: &mut Accumulators,
) {
    let threshold = SIGNIFICANT_WEIGHT_LOW * weights.max_weight;

    for (score, &weight) in scores.entries.iter().zip(&weights.weights) {
        if weight <= threshold {
            continue;
        }
        let w = weight / weights.sum;
        let h = score.hypothesis;
        let reference = &snap.model.references[h.class];

        // impute the missing wedge from the matching reference copy
        let mut completed = shifted.spectra[h.translation].clone();
        let source = reference.shifted(h.translation);
        for &idx in &wedge.unobserved {
            completed.re[idx] = source.re[idx];
            completed.im[idx] = source.im[idx];
        }

        let a = snap.grid.orientations[h.orientation].matrix * *pre_rotation;
        let aligned = completed.rotated(&a.transpose());
        acc.class_sums[h.class].add_scaled(w, &aligned);

        for (dst, r) in acc.shell_residuals.iter_mut().zip(&score.shell_residuals) {
            *dst += w * r;
        }

        let t = snap.grid.translations[h.translation].as_f64();
        let r2: f64 = (0..3).map(|d| (t[d] + pre_offset[d]).powi(2)).sum();
        acc.offset_variance += w * r2;
    }

    add_into(&mut acc.class_weights, &weights.class_responsibilities);
    add_into(&mut acc.shell_pixels, &wedge.observed_per_shell);
    acc.log_likelihood += weights.sum.ln() - scores.min_diff;
    acc.fit_quality += weights.max_weight / weights.sum;
    acc.nr_particles += 1;
}

/// Point estimate of the best hypothesis.
pub fn report(
    scores: &Scores,
    weights: &Weights,
    pre_rotation: &Rot3,
    grid: &HypothesisGrid,
) -> ParticleOutcome {
    let best = &scores.entries[weights.best];
    let h = best.hypothesis;
    let a = grid.orientations[h.orientation].matrix * *pre_rotation;
    ParticleOutcome {
        class: h.class,
        angles: a.to_euler(),
        translation: grid.translations[h.translation].as_f64(),
        max_weight: weights.max_weight / weights.sum,
        log_likelihood: weights.sum.ln() - scores.min_diff,
        responsibilities: weights.class_responsibilities.clone(),
    }
}
