//! Per-particle tables: the input alignment document, the planned
//! misalignment table, and the records written after every iteration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::geometry::EulerAngles;
use crate::model::Particle;

/// One row of the particle document. `volume` names the sub-volume file and
/// doubles as the particle name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleEntry {
    pub volume: String,
    #[serde(default)]
    pub rot: f64,
    #[serde(default)]
    pub tilt: f64,
    #[serde(default)]
    pub psi: f64,
    #[serde(default)]
    pub xoff: f64,
    #[serde(default)]
    pub yoff: f64,
    #[serde(default)]
    pub zoff: f64,
    #[serde(default)]
    pub wedge: i64,
}

impl ParticleEntry {
    pub fn angles(&self) -> EulerAngles {
        EulerAngles::new(self.rot, self.tilt, self.psi)
    }

    pub fn offset(&self) -> [f64; 3] {
        [self.xoff, self.yoff, self.zoff]
    }
}

/// Extra rotation and offset applied on top of a particle's pre-alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Misalignment {
    pub volume: String,
    #[serde(default)]
    pub rot: f64,
    #[serde(default)]
    pub tilt: f64,
    #[serde(default)]
    pub psi: f64,
    #[serde(default)]
    pub xoff: f64,
    #[serde(default)]
    pub yoff: f64,
    #[serde(default)]
    pub zoff: f64,
}

/// Compose every particle's pre-orientation with its planned misalignment
/// (`A_mis · A_pre`) and add the extra offset. Every particle must be listed.
pub fn apply_misalignment(particles: &mut [Particle], table: &[Misalignment]) -> Result<()> {
    let by_name: HashMap<&str, &Misalignment> =
        table.iter().map(|m| (m.volume.as_str(), m)).collect();

    for particle in particles.iter_mut() {
        let mis = by_name.get(particle.name.as_str()).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "{} not found in misalignment table",
                particle.name
            ))
        })?;
        let a = EulerAngles::new(mis.rot, mis.tilt, mis.psi).matrix() * particle.angles.matrix();
        particle.angles = a.to_euler();
        particle.offset[0] += mis.xoff.round();
        particle.offset[1] += mis.yoff.round();
        particle.offset[2] += mis.zoff.round();
    }
    Ok(())
}

/// Alignment and fit of one particle after an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub volume: String,
    pub rot: f64,
    pub tilt: f64,
    pub psi: f64,
    pub xoff: f64,
    pub yoff: f64,
    pub zoff: f64,
    pub wedge: i64,
    /// One-based class number; absent before the first iteration.
    pub class: Option<usize>,
    pub max_weight: f64,
    pub log_likelihood: f64,
    pub responsibilities: Vec<f64>,
}

impl From<&Particle> for ParticleRecord {
    fn from(p: &Particle) -> Self {
        Self {
            volume: p.name.clone(),
            rot: p.angles.rot,
            tilt: p.angles.tilt,
            psi: p.angles.psi,
            xoff: p.offset[0],
            yoff: p.offset[1],
            zoff: p.offset[2],
            wedge: p.wedge,
            class: p.fit.class.map(|c| c + 1),
            max_weight: p.fit.max_weight,
            log_likelihood: p.fit.log_likelihood,
            responsibilities: p.fit.responsibilities.clone(),
        }
    }
}

/// Class fraction table row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FractionEntry {
    /// One-based class number.
    pub class: usize,
    pub fraction: f64,
}

/// Fractions ordered by class number; every class `1..=n` exactly once.
pub fn fractions_from_table(table: &[FractionEntry], nr_classes: usize) -> Result<Vec<f64>> {
    if table.len() != nr_classes {
        return Err(ConfigError::TableLength {
            what: "fraction table",
            found: table.len(),
            expected: nr_classes,
        }
        .into());
    }
    let mut fractions = vec![None; nr_classes];
    for entry in table {
        let slot = entry.class.checked_sub(1).and_then(|i| fractions.get_mut(i));
        match slot {
            Some(slot) if slot.is_none() => *slot = Some(entry.fraction),
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "fraction table has an invalid or repeated class {}",
                    entry.class
                ))
                .into())
            }
        }
    }
    Ok(fractions.into_iter().flatten().collect())
}

pub fn fractions_to_table(fractions: &[f64]) -> Vec<FractionEntry> {
    fractions
        .iter()
        .enumerate()
        .map(|(i, &fraction)| FractionEntry {
            class: i + 1,
            fraction,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::angle_diff;
    use crate::model::ParticleFit;
    use crate::volume::Volume;

    #[test]
    fn entry_defaults_to_no_alignment() {
        let e: ParticleEntry = serde_json::from_str(r#"{"volume": "p1.npy", "wedge": 2}"#).unwrap();
        assert_eq!(e.angles(), EulerAngles::default());
        assert_eq!(e.offset(), [0.0; 3]);
        assert_eq!(e.wedge, 2);
    }

    #[test]
    fn misalignment_composes_rotation_and_adds_offset() {
        let mut particles = vec![Particle::new("a", Volume::zeros((2, 2, 2)))
            .with_alignment(EulerAngles::new(30.0, 0.0, 0.0), [1.0, 0.0, 0.0])];
        let table = vec![Misalignment {
            volume: "a".into(),
            rot: 20.0,
            tilt: 0.0,
            psi: 0.0,
            xoff: 0.0,
            yoff: 2.0,
            zoff: -1.0,
        }];
        apply_misalignment(&mut particles, &table).unwrap();
        let a = particles[0].angles;
        // rotations about z add up, however they are split between rot and psi
        assert!(angle_diff(a.rot + a.psi, 50.0).abs() < 1e-9);
        assert!(a.tilt.abs() < 1e-9);
        assert_eq!(particles[0].offset, [1.0, 2.0, -1.0]);
    }

    #[test]
    fn misalignment_requires_every_particle() {
        let mut particles = vec![Particle::new("a", Volume::zeros((2, 2, 2)))];
        assert!(apply_misalignment(&mut particles, &[]).is_err());
    }

    #[test]
    fn record_uses_one_based_class() {
        let mut p = Particle::new("a", Volume::zeros((2, 2, 2)));
        p.fit = ParticleFit {
            class: Some(0),
            max_weight: 0.5,
            log_likelihood: -3.0,
            responsibilities: vec![1.0, 0.0],
        };
        let r = ParticleRecord::from(&p);
        assert_eq!(r.class, Some(1));
        assert_eq!(r.responsibilities, vec![1.0, 0.0]);
    }

    #[test]
    fn fraction_table_is_ordered_by_class() {
        let table = vec![
            FractionEntry { class: 2, fraction: 0.7 },
            FractionEntry { class: 1, fraction: 0.3 },
        ];
        assert_eq!(fractions_from_table(&table, 2).unwrap(), vec![0.3, 0.7]);
        assert!(fractions_from_table(&table, 3).is_err());
        let repeated = vec![
            FractionEntry { class: 1, fraction: 0.3 },
            FractionEntry { class: 1, fraction: 0.7 },
        ];
        assert!(fractions_from_table(&repeated, 2).is_err());
        assert_eq!(fractions_to_table(&[0.3, 0.7]), vec![
            FractionEntry { class: 1, fraction: 0.3 },
            FractionEntry { class: 2, fraction: 0.7 },
        ]);
    }
}
