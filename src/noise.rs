use crate::error::Result;
use crate::fourier::Fft3;
use crate::model::Particle;
use crate::volume;
use crate::wedge::{ShellBand, WedgeSet};

/// Initial noise spectrum from the observed power of every particle:
/// `σ²[shell] = Σ|F|² / (2 · observed count)`, zero for empty shells.
pub fn estimate_initial_sigma2(
    particles: &[Particle],
    wedges: &WedgeSet,
    band: ShellBand,
    fft: &Fft3,
) -> Result<Vec<f64>> {
    let mut power = vec![0.0; band.nr_shells()];
    let mut count = vec![0.0; band.nr_shells()];

    for particle in particles {
        volume::check_dim(format!("particle '{}'", particle.name), &particle.volume, fft.dim())?;
        let wedge = wedges.get(particle.wedge)?;
        let spectrum = fft.forward(&particle.volume);
        for p in &wedge.observed {
            let (re, im) = (spectrum.re[p.index], spectrum.im[p.index]);
            power[p.shell] += re * re + im * im;
            count[p.shell] += 1.0;
        }
    }

    Ok(power
        .iter()
        .zip(&count)
        .map(|(&s, &n)| if n > 0.0 { s / (2.0 * n) } else { 0.0 })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wedge::MissingWedge;
    use ndarray::Array3;

    #[test]
    fn flat_spectrum_gives_half_power() {
        let dim = 8;
        let fft = Fft3::new(dim);
        // a delta at the origin has |F| = 1 everywhere
        let mut vol = Array3::zeros((dim, dim, dim));
        vol[[4, 4, 4]] = 1.0;
        let band = ShellBand::from_resolution(dim, 0.25, -1.0).unwrap();
        let wedges = WedgeSet::build(&[MissingWedge::full(0)], dim, band).unwrap();
        let particles = vec![Particle::new("a", vol.clone()), Particle::new("b", vol)];
        let sigma2 = estimate_initial_sigma2(&particles, &wedges, band, &fft).unwrap();
        assert_eq!(sigma2.len(), 4);
        assert_eq!(sigma2[0], 0.0);
        assert_eq!(sigma2[1], 0.0);
        for s in &sigma2[2..] {
            assert!((s - 0.5).abs() < 1e-12);
        }
    }
}
