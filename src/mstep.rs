//! Maximization step: re-estimate references, fractions, offset width and
//! noise spectrum from a completed sweep.

use serde::{Deserialize, Serialize};

use crate::accum::Accumulators;
use crate::error::{NumericalError, Result};
use crate::grid::{HypothesisGrid, SearchSpace};
use crate::model::Model;
use crate::symmetry::PointGroup;

/// Parameters the M-step leaves untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frozen {
    pub fractions: bool,
    pub sigma_noise: bool,
    pub sigma_offset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    pub total_weight: f64,
    /// Responsibility totals per class before normalization.
    pub class_weights: Vec<f64>,
    pub log_likelihood: f64,
    /// Mean best-hypothesis weight over particles.
    pub average_fit: f64,
}

/// Consume the accumulators, update `model` and return the grid for the
/// next sweep. Every translated reference copy is regenerated against it.
pub fn maximize(
    model: &mut Model,
    mut acc: Accumulators,
    space: &SearchSpace,
    frozen: Frozen,
    symmetry: Option<&PointGroup>,
) -> Result<(HypothesisGrid, UpdateReport)> {
    let total = acc.total_weight();
    if !(total > 0.0) {
        return Err(NumericalError::ZeroTotalResponsibility.into());
    }

    if let Some(group) = symmetry {
        for sum in &mut acc.class_sums {
            *sum = group.symmetrize(sum);
        }
    }

    if !frozen.fractions {
        model.fractions = acc.class_weights.iter().map(|w| w / total).collect();
    }
    if !frozen.sigma_offset {
        model.sigma_offset = (acc.offset_variance / (3.0 * total)).sqrt();
    }
    if !frozen.sigma_noise {
        model.sigma2 = acc
            .shell_residuals
            .iter()
            .zip(&acc.shell_pixels)
            .map(|(&r, &n)| if n > 0.0 { r / (2.0 * n) } else { 0.0 })
            .collect();
    }

    let grid = HypothesisGrid::new(space, model.sigma_offset)?;

    for ((reference, mut spectrum), &w) in model
        .references
        .iter_mut()
        .zip(acc.class_sums)
        .zip(&acc.class_weights)
    {
        if w > 0.0 {
            spectrum.scale(1.0 / w);
        } else {
            spectrum.fill_zero();
        }
        reference.reset(spectrum, &grid);
    }

    let report = UpdateReport {
        total_weight: total,
        class_weights: acc.class_weights,
        log_likelihood: acc.log_likelihood,
        average_fit: acc.fit_quality / total,
    };
    Ok((grid, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourier::Fft3;
    use crate::grid::AngularRange;
    use crate::volume::Volume;

    fn setup() -> (Model, SearchSpace, Fft3) {
        let fft = Fft3::new(4);
        let space = SearchSpace {
            rot: AngularRange::fixed(),
            tilt: AngularRange::fixed(),
            psi: AngularRange::fixed(),
            search_radius: 1.0,
        };
        let grid = HypothesisGrid::new(&space, 2.0).unwrap();
        let refs = vec![Volume::from_elem((4, 4, 4), 1.0); 2];
        let model = Model::new(&refs, &fft, &grid, None, vec![1.0; 3]).unwrap();
        (model, space, fft)
    }

    #[test]
    fn updates_every_parameter() {
        let (mut model, space, _) = setup();
        let mut acc = Accumulators::new(2, 4, 3);
        acc.class_weights = vec![3.0, 1.0];
        acc.class_sums[0].re.fill(6.0);
        acc.shell_residuals = vec![4.0, 8.0, 5.0];
        acc.shell_pixels = vec![1.0, 2.0, 0.0];
        acc.offset_variance = 12.0;
        acc.fit_quality = 2.0;

        let (grid, report) = maximize(&mut model, acc, &space, Frozen::default(), None).unwrap();
        assert_eq!(model.fractions, vec![0.75, 0.25]);
        assert!((model.fractions.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(model.sigma_offset, 1.0);
        assert_eq!(model.sigma2, vec![2.0, 2.0, 0.0]);
        assert_eq!(grid.sigma_offset, 1.0);
        assert!(model.references[0].zero_shift().re.iter().all(|&v| v == 2.0));
        assert_eq!(report.total_weight, 4.0);
        assert_eq!(report.average_fit, 0.5);
    }

    #[test]
    fn frozen_parameters_stay() {
        let (mut model, space, _) = setup();
        let before = model.clone();
        let mut acc = Accumulators::new(2, 4, 3);
        acc.class_weights = vec![1.0, 1.0];
        acc.shell_residuals = vec![1.0; 3];
        acc.shell_pixels = vec![1.0; 3];
        let frozen = Frozen {
            fractions: true,
            sigma_noise: true,
            sigma_offset: true,
        };
        maximize(&mut model, acc, &space, frozen, None).unwrap();
        assert_eq!(model.fractions, before.fractions);
        assert_eq!(model.sigma2, before.sigma2);
        assert_eq!(model.sigma_offset, before.sigma_offset);
    }

    #[test]
    fn empty_class_is_starved() {
        let (mut model, space, _) = setup();
        let mut acc = Accumulators::new(2, 4, 3);
        acc.class_weights = vec![1.0, 0.0];
        acc.offset_variance = 3.0;
        maximize(&mut model, acc, &space, Frozen::default(), None).unwrap();
        assert_eq!(model.fractions, vec![1.0, 0.0]);
        let empty = &model.references[1];
        for i in 0..7 {
            assert!(empty.shifted(i).re.iter().all(|&v| v == 0.0));
            assert!(empty.shifted(i).im.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn zero_offset_width_collapses_next_grid() {
        let (mut model, space, _) = setup();
        let mut acc = Accumulators::new(2, 4, 3);
        acc.class_weights = vec![1.0, 1.0];
        let (grid, _) = maximize(&mut model, acc, &space, Frozen::default(), None).unwrap();
        assert_eq!(model.sigma_offset, 0.0);
        assert_eq!(grid.translations.len(), 1);
    }

    #[test]
    fn symmetry_is_applied_before_dividing_by_class_weight() {
        let dim = 8;
        let fft = Fft3::new(dim);
        let space = SearchSpace {
            rot: AngularRange::fixed(),
            tilt: AngularRange::fixed(),
            psi: AngularRange::fixed(),
            search_radius: 0.0,
        };
        let grid = HypothesisGrid::new(&space, 0.0).unwrap();
        let refs = vec![Volume::zeros((dim, dim, dim)); 2];
        let mut model = Model::new(&refs, &fft, &grid, None, vec![1.0; 4]).unwrap();

        let mut acc = Accumulators::new(2, dim, 4);
        acc.class_weights = vec![2.0, 1.0];
        // frequency x = +2
        acc.class_sums[0].re[[4, 4, 6]] = 2.0;
        let c2 = PointGroup::cyclic(2);
        maximize(&mut model, acc, &space, Frozen::default(), Some(&c2)).unwrap();

        let spectrum = model.references[0].zero_shift();
        // half of 2.0 on each of x = +2 and x = -2, over a class weight of 2
        assert!((spectrum.re[[4, 4, 6]] - 0.5).abs() < 1e-9);
        assert!((spectrum.re[[4, 4, 2]] - 0.5).abs() < 1e-9);
        let rest: f64 = spectrum.re.iter().map(|v| v.abs()).sum::<f64>() - 1.0;
        assert!(rest.abs() < 1e-9);
    }

    #[test]
    fn no_responsibility_is_degenerate() {
        let (mut model, space, _) = setup();
        let acc = Accumulators::new(2, 4, 3);
        assert!(maximize(&mut model, acc, &space, Frozen::default(), None).is_err());
    }
}
