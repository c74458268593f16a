//! Iteration controller: E-step sweep over all particles, M-step, reference
//! post-processing.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::accum::Accumulators;
use crate::config::RefineConfig;
use crate::error::{ConfigError, Result};
use crate::estep::{self, ParticleOutcome, Snapshot};
use crate::fourier::Fft3;
use crate::grid::HypothesisGrid;
use crate::model::{Model, Particle, ParticleFit};
use crate::mstep;
use crate::noise;
use crate::postprocess::{self, SolventFlattening};
use crate::symmetry::PointGroup;
use crate::volume::{self, Volume};
use crate::wedge::{MissingWedge, ShellBand, WedgeSet};

pub struct Refiner {
    config: RefineConfig,
    fft: Fft3,
    band: ShellBand,
    wedges: WedgeSet,
    grid: HypothesisGrid,
    model: Model,
    symmetry: Option<PointGroup>,
    solvent: SolventFlattening,
    noise_ready: bool,
    iteration: usize,
}

/// Outcome of one iteration.
pub struct IterationSummary {
    pub iteration: usize,
    /// M-step references before post-processing.
    pub raw_references: Vec<Volume>,
    pub references: Vec<Volume>,
    pub log: IterationLog,
}

/// Scalar part of an iteration summary, as written to the log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationLog {
    pub iteration: usize,
    pub nr_particles: usize,
    /// Total log-likelihood up to an additive constant.
    pub log_likelihood: f64,
    pub average_fit: f64,
    pub fractions: Vec<f64>,
    pub class_weights: Vec<f64>,
    pub sigma_offset: f64,
    pub sigma2: Vec<f64>,
}

impl Refiner {
    /// `wedges` may be empty, in which case every particle is fully sampled
    /// under wedge id 0.
    pub fn new(
        config: RefineConfig,
        references: &[Volume],
        wedges: &[MissingWedge],
    ) -> Result<Self> {
        config.validate()?;
        let first = references
            .first()
            .ok_or_else(|| ConfigError::Invalid("at least one reference is required".into()))?;
        let dim = volume::cube_dim(first)?;
        let band = config.band(dim)?;
        let fft = Fft3::new(dim);

        let wedges = WedgeSet::build(wedges, dim, band)?;
        let grid = HypothesisGrid::new(&config.search_space(), config.sigma_offset)?;
        let model = Model::new(references, &fft, &grid, None, vec![0.0; band.nr_shells()])?;

        tracing::info!(
            dim,
            classes = model.nr_classes(),
            orientations = grid.orientations.len(),
            translations = grid.translations.len(),
            shells = ?(band.min, band.max),
            "refinement set up"
        );

        Ok(Self {
            iteration: config.istart,
            config,
            fft,
            band,
            wedges,
            grid,
            model,
            symmetry: None,
            solvent: SolventFlattening::new(Vec::new(), dim)?,
            noise_ready: false,
        })
    }

    pub fn with_fractions(mut self, fractions: Vec<f64>) -> Result<Self> {
        self.model.fractions =
            crate::model::normalize_fractions(fractions, self.model.nr_classes())?;
        Ok(self)
    }

    /// Start from a known noise spectrum instead of estimating one.
    pub fn with_sigma2(mut self, sigma2: Vec<f64>) -> Result<Self> {
        if sigma2.len() != self.band.nr_shells() {
            return Err(ConfigError::TableLength {
                what: "noise table",
                found: sigma2.len(),
                expected: self.band.nr_shells(),
            }
            .into());
        }
        self.model.sigma2 = sigma2;
        self.noise_ready = true;
        Ok(self)
    }

    pub fn with_symmetry(mut self, group: PointGroup) -> Self {
        self.symmetry = Some(group);
        self
    }

    pub fn with_solvent_masks(mut self, masks: Vec<Volume>) -> Result<Self> {
        self.solvent = SolventFlattening::new(masks, self.fft.dim())?;
        Ok(self)
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn grid(&self) -> &HypothesisGrid {
        &self.grid
    }

    pub fn band(&self) -> ShellBand {
        self.band
    }

    pub fn dim(&self) -> usize {
        self.fft.dim()
    }

    /// Number the next call to [`Refiner::iterate`] will report.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Check every particle against the model and estimate the initial
    /// noise spectrum unless one was supplied. Returns the spectrum in use.
    pub fn prepare(&mut self, particles: &[Particle]) -> Result<&[f64]> {
        if particles.is_empty() {
            return Err(ConfigError::Invalid("no particles to refine".into()).into());
        }
        for particle in particles {
            volume::check_dim(
                format!("particle '{}'", particle.name),
                &particle.volume,
                self.dim(),
            )?;
            self.wedges.get(particle.wedge)?;
        }
        if !self.noise_ready {
            tracing::info!(particles = particles.len(), "estimating initial noise spectrum");
            self.model.sigma2 =
                noise::estimate_initial_sigma2(particles, &self.wedges, self.band, &self.fft)?;
            self.noise_ready = true;
        }
        Ok(&self.model.sigma2)
    }

    /// One full expectation-maximization cycle. Particles take their optimal
    /// alignment and fit; the model is replaced by its re-estimate.
    pub fn iterate(&mut self, particles: &mut [Particle]) -> Result<IterationSummary> {
        self.prepare(particles)?;

        let (acc, outcomes) = self.sweep(particles)?;
        for (particle, outcome) in particles.iter_mut().zip(outcomes) {
            apply_outcome(particle, outcome);
        }

        let (grid, report) = mstep::maximize(
            &mut self.model,
            acc,
            &self.config.search_space(),
            self.config.frozen,
            self.symmetry.as_ref(),
        )?;
        self.grid = grid;

        let post = postprocess::post_process(&mut self.model, &self.grid, &self.fft, &self.solvent);

        let log = IterationLog {
            iteration: self.iteration,
            nr_particles: particles.len(),
            log_likelihood: report.log_likelihood,
            average_fit: report.average_fit,
            fractions: self.model.fractions.clone(),
            class_weights: report.class_weights,
            sigma_offset: self.model.sigma_offset,
            sigma2: self.model.sigma2.clone(),
        };
        tracing::info!(
            iteration = log.iteration,
            log_likelihood = log.log_likelihood,
            average_fit = log.average_fit,
            sigma_offset = log.sigma_offset,
            fractions = ?log.fractions,
            "iteration finished"
        );

        let summary = IterationSummary {
            iteration: self.iteration,
            raw_references: post.raw,
            references: post.references,
            log,
        };
        self.iteration += 1;
        Ok(summary)
    }

    fn sweep(&self, particles: &[Particle]) -> Result<(Accumulators, Vec<ParticleOutcome>)> {
        let snap = Snapshot {
            model: &self.model,
            grid: &self.grid,
            wedges: &self.wedges,
            fft: &self.fft,
        };
        let empty = || {
            Accumulators::new(self.model.nr_classes(), self.dim(), self.band.nr_shells())
        };

        if !self.config.parallel {
            let mut acc = empty();
            let outcomes = particles
                .iter()
                .map(|p| estep::expectation(p, &snap, &mut acc))
                .collect::<Result<Vec<_>>>()?;
            return Ok((acc, outcomes));
        }

        let (acc, mut outcomes) = particles
            .par_iter()
            .enumerate()
            .try_fold(
                || (empty(), Vec::new()),
                |(mut acc, mut outcomes), (i, p)| {
                    let outcome = estep::expectation(p, &snap, &mut acc)?;
                    outcomes.push((i, outcome));
                    Ok::<_, crate::error::MlfError>((acc, outcomes))
                },
            )
            .try_reduce(
                || (empty(), Vec::new()),
                |(a, mut oa), (b, ob)| {
                    oa.extend(ob);
                    Ok((a.merge(b), oa))
                },
            )?;
        outcomes.sort_by_key(|(i, _)| *i);
        Ok((acc, outcomes.into_iter().map(|(_, o)| o).collect()))
    }
}

fn apply_outcome(particle: &mut Particle, outcome: ParticleOutcome) {
    particle.angles = outcome.angles;
    for (offset, t) in particle.offset.iter_mut().zip(outcome.translation) {
        *offset += t;
    }
    particle.fit = ParticleFit {
        class: Some(outcome.class),
        max_weight: outcome.max_weight,
        log_likelihood: outcome.log_likelihood,
        responsibilities: outcome.responsibilities,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::AngularRange;
    use ndarray::Array3;

    fn blob(dim: usize, at: [f64; 3]) -> Volume {
        let c = (dim / 2) as f64;
        Array3::from_shape_fn((dim, dim, dim), |(z, y, x)| {
            let d2 = (x as f64 - c - at[0]).powi(2)
                + (y as f64 - c - at[1]).powi(2)
                + (z as f64 - c - at[2]).powi(2);
            (-d2 / 2.0).exp()
        })
    }

    fn config(parallel: bool) -> RefineConfig {
        RefineConfig {
            iterations: 1,
            rot: AngularRange::fixed(),
            tilt: AngularRange::fixed(),
            psi: AngularRange::fixed(),
            search_radius: 1.0,
            sigma_offset: 1.0,
            parallel,
            ..RefineConfig::default()
        }
    }

    fn particles(dim: usize) -> Vec<Particle> {
        (0..6)
            .map(|i| {
                let at = if i % 2 == 0 { [1.0, 0.0, 0.0] } else { [0.0, -1.0, 0.0] };
                Particle::new(format!("p{}", i), blob(dim, at))
            })
            .collect()
    }

    #[test]
    fn parallel_and_sequential_sweeps_agree() {
        let _guard = crate::logging::init_test();
        let dim = 8;
        let refs = vec![blob(dim, [1.0, 0.0, 0.0]), blob(dim, [0.0, -1.0, 0.0])];
        let mut results = Vec::new();
        for parallel in [false, true] {
            let mut refiner = Refiner::new(config(parallel), &refs, &[]).unwrap();
            let mut ps = particles(dim);
            let summary = refiner.iterate(&mut ps).unwrap();
            results.push((summary.log, ps));
        }
        let (seq, par) = (&results[0], &results[1]);
        let tolerance = 1e-6 * seq.0.log_likelihood.abs().max(1.0);
        assert!((seq.0.log_likelihood - par.0.log_likelihood).abs() < tolerance);
        assert_eq!(seq.0.nr_particles, 6);
        for (a, b) in seq.1.iter().zip(&par.1) {
            assert_eq!(a.fit.class, b.fit.class);
            assert_eq!(a.offset, b.offset);
        }
        for (a, b) in seq.0.fractions.iter().zip(&par.0.fractions) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn iteration_counter_starts_at_istart() {
        let dim = 8;
        let refs = vec![blob(dim, [0.0; 3])];
        let cfg = RefineConfig { istart: 5, ..config(false) };
        let mut refiner = Refiner::new(cfg, &refs, &[]).unwrap();
        let mut ps = particles(dim);
        assert_eq!(refiner.iterate(&mut ps).unwrap().iteration, 5);
        assert_eq!(refiner.iteration(), 6);
        assert!(ps.iter().all(|p| p.fit.class == Some(0)));
        assert!(ps.iter().all(|p| (p.fit.responsibilities[0] - 1.0).abs() < 1e-12));
    }

    #[test]
    fn supplied_noise_table_must_match_band() {
        let dim = 8;
        let refs = vec![blob(dim, [0.0; 3])];
        let refiner = Refiner::new(config(false), &refs, &[]).unwrap();
        assert!(refiner.with_sigma2(vec![1.0; 2]).is_err());
        let refiner = Refiner::new(config(false), &refs, &[]).unwrap();
        let mut refiner = refiner.with_sigma2(vec![1.0; 4]).unwrap();
        assert_eq!(refiner.prepare(&particles(dim)).unwrap(), &[1.0; 4][..]);
    }

    #[test]
    fn rejects_particles_of_the_wrong_size() {
        let refs = vec![blob(8, [0.0; 3])];
        let mut refiner = Refiner::new(config(false), &refs, &[]).unwrap();
        let mut ps = vec![Particle::new("big", blob(10, [0.0; 3]))];
        assert!(refiner.iterate(&mut ps).is_err());
    }

    #[test]
    fn solvent_masks_flatten_the_next_references() {
        let dim = 8;
        let refs = vec![blob(dim, [1.0, 0.0, 0.0]), blob(dim, [0.0, -1.0, 0.0])];
        let mask = volume::spherical_mask(dim, 2.0).mapv(|v| 1.0 - v);
        let mut refiner = Refiner::new(config(false), &refs, &[])
            .unwrap()
            .with_solvent_masks(vec![mask])
            .unwrap();
        let mut ps = particles(dim);
        let summary = refiner.iterate(&mut ps).unwrap();

        assert_ne!(summary.references, summary.raw_references);
        for (reference, vol) in refiner.model.references.iter().zip(&summary.references) {
            assert_eq!(reference.zero_shift(), &refiner.fft.forward(vol));
        }
    }

    #[test]
    fn rejects_solvent_mask_of_the_wrong_size() {
        let refs = vec![blob(8, [0.0; 3])];
        let refiner = Refiner::new(config(false), &refs, &[]).unwrap();
        assert!(refiner.with_solvent_masks(vec![blob(6, [0.0; 3])]).is_err());
    }

    #[test]
    fn rejects_unknown_wedge_before_sweeping() {
        let refs = vec![blob(8, [0.0; 3])];
        let wedges = [MissingWedge {
            id: 1,
            theta0: -60.0,
            theta_f: 60.0,
        }];
        let mut refiner = Refiner::new(config(false), &refs, &wedges).unwrap();
        let ps = vec![Particle::new("p", blob(8, [0.0; 3])).with_wedge(2)];
        assert!(refiner.prepare(&ps).is_err());
    }
}
