use crate::fourier::Spectrum;

/// Weighted sums collected over one E-step sweep.
///
/// Every field is a plain sum, so partial accumulators from disjoint
/// particle subsets combine with [`Accumulators::merge`] in any order.
#[derive(Debug, Clone)]
pub struct Accumulators {
    /// Responsibility-weighted spectra per class, in the reference frame.
    pub class_sums: Vec<Spectrum>,
    /// Responsibility totals per class.
    pub class_weights: Vec<f64>,
    /// Weighted squared residuals per resolution shell.
    pub shell_residuals: Vec<f64>,
    /// Observed coefficients per shell, summed over particles.
    pub shell_pixels: Vec<f64>,
    /// Weighted squared total offsets.
    pub offset_variance: f64,
    pub log_likelihood: f64,
    /// Sum of per-particle best-hypothesis weights.
    pub fit_quality: f64,
    pub nr_particles: usize,
}

impl Accumulators {
    pub fn new(nr_classes: usize, dim: usize, nr_shells: usize) -> Self {
        Self {
            class_sums: (0..nr_classes).map(|_| Spectrum::zeros(dim)).collect(),
            class_weights: vec![0.0; nr_classes],
            shell_residuals: vec![0.0; nr_shells],
            shell_pixels: vec![0.0; nr_shells],
            offset_variance: 0.0,
            log_likelihood: 0.0,
            fit_quality: 0.0,
            nr_particles: 0,
        }
    }

    pub fn merge(mut self, other: Accumulators) -> Accumulators {
        for (a, b) in self.class_sums.iter_mut().zip(&other.class_sums) {
            a.add_scaled(1.0, b);
        }
        add_into(&mut self.class_weights, &other.class_weights);
        add_into(&mut self.shell_residuals, &other.shell_residuals);
        add_into(&mut self.shell_pixels, &other.shell_pixels);
        self.offset_variance += other.offset_variance;
        self.log_likelihood += other.log_likelihood;
        self.fit_quality += other.fit_quality;
        self.nr_particles += other.nr_particles;
        self
    }

    pub fn total_weight(&self) -> f64 {
        self.class_weights.iter().sum()
    }
}

pub(crate) fn add_into(dst: &mut [f64], src: &[f64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_every_field() {
        let mut a = Accumulators::new(2, 2, 3);
        let mut b = Accumulators::new(2, 2, 3);
        a.class_weights = vec![0.5, 0.5];
        b.class_weights = vec![1.0, 0.0];
        a.shell_residuals[1] = 2.0;
        b.shell_residuals[1] = 3.0;
        b.shell_pixels[2] = 4.0;
        a.class_sums[1].re[[0, 0, 0]] = 1.5;
        b.class_sums[1].re[[0, 0, 0]] = 2.5;
        a.offset_variance = 1.0;
        b.offset_variance = 2.0;
        a.nr_particles = 1;
        b.nr_particles = 1;

        let m = a.merge(b);
        assert_eq!(m.class_weights, vec![1.5, 0.5]);
        assert_eq!(m.shell_residuals, vec![0.0, 5.0, 0.0]);
        assert_eq!(m.shell_pixels, vec![0.0, 0.0, 4.0]);
        assert_eq!(m.class_sums[1].re[[0, 0, 0]], 4.0);
        assert_eq!(m.offset_variance, 3.0);
        assert_eq!(m.nr_particles, 2);
        assert_eq!(m.total_weight(), 2.0);
    }
}
