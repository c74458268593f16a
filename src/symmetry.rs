use std::str::FromStr;

use crate::error::{ConfigError, MlfError};
use crate::fourier::Spectrum;
use crate::geometry::Rot3;

/// Rotational point group, given by its operators (identity included).
#[derive(Debug, Clone, PartialEq)]
pub struct PointGroup {
    pub name: String,
    pub operators: Vec<Rot3>,
}

impl PointGroup {
    /// n-fold axis along z.
    pub fn cyclic(n: usize) -> Self {
        let operators = (0..n)
            .map(|i| Rot3::from_euler(360.0 * i as f64 / n as f64, 0.0, 0.0))
            .collect();
        Self {
            name: format!("C{}", n),
            operators,
        }
    }

    /// n-fold axis along z plus 2-fold axes perpendicular to it.
    pub fn dihedral(n: usize) -> Self {
        let cyclic = Self::cyclic(n);
        // 180 degrees about x
        let flip = Rot3([[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]]);
        let mut operators = cyclic.operators.clone();
        operators.extend(cyclic.operators.iter().map(|op| flip * *op));
        Self {
            name: format!("D{}", n),
            operators,
        }
    }

    pub fn order(&self) -> usize {
        self.operators.len()
    }

    /// Average of the spectrum over every operator of the group.
    pub fn symmetrize(&self, spectrum: &Spectrum) -> Spectrum {
        let mut out = Spectrum::zeros(spectrum.dim());
        let w = 1.0 / self.order() as f64;
        for op in &self.operators {
            out.add_scaled(w, &spectrum.rotated(op));
        }
        out
    }
}

impl FromStr for PointGroup {
    type Err = MlfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || MlfError::from(ConfigError::Symmetry(s.to_string()));
        let mut chars = s.chars();
        let kind = chars.next().ok_or_else(bad)?.to_ascii_uppercase();
        let n: usize = chars.as_str().parse().map_err(|_| bad())?;
        if n == 0 {
            return Err(bad());
        }
        match kind {
            'C' => Ok(Self::cyclic(n)),
            'D' => Ok(Self::dihedral(n)),
            _ => Err(bad()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn parses_descriptors() {
        assert_eq!("C1".parse::<PointGroup>().unwrap().order(), 1);
        assert_eq!("c4".parse::<PointGroup>().unwrap().order(), 4);
        assert_eq!("D3".parse::<PointGroup>().unwrap().order(), 6);
        assert!("I".parse::<PointGroup>().is_err());
        assert!("C0".parse::<PointGroup>().is_err());
        assert!("Cx".parse::<PointGroup>().is_err());
    }

    #[test]
    fn c1_leaves_spectrum_alone() {
        let mut s = Spectrum::zeros(4);
        s.re[[2, 2, 3]] = 1.0;
        let out = PointGroup::cyclic(1).symmetrize(&s);
        assert!((out.re[[2, 2, 3]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn c2_spreads_over_the_axis() {
        let dim = 8;
        let mut s = Spectrum {
            re: Array3::zeros((dim, dim, dim)),
            im: Array3::zeros((dim, dim, dim)),
        };
        // frequency x = +2
        s.re[[4, 4, 6]] = 2.0;
        let out = PointGroup::cyclic(2).symmetrize(&s);
        assert!((out.re[[4, 4, 6]] - 1.0).abs() < 1e-9);
        // its partner at x = -2
        assert!((out.re[[4, 4, 2]] - 1.0).abs() < 1e-9);
    }
}
