use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::grid::{AngularRange, SearchSpace};
use crate::mstep::Frozen;
use crate::wedge::ShellBand;

/// Every numeric parameter of a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub iterations: usize,
    /// Number given to the first iteration in output names.
    pub istart: usize,
    pub rot: AngularRange,
    pub tilt: AngularRange,
    pub psi: AngularRange,
    /// Translation search radius in pixels.
    pub search_radius: f64,
    /// Initial width of the offset prior.
    pub sigma_offset: f64,
    /// Lowest resolution used, as a fraction of the cube dimension.
    /// Negative selects 0.
    pub lowres: f64,
    /// Highest resolution used; negative selects Nyquist (0.5).
    pub highres: f64,
    pub frozen: Frozen,
    pub parallel: bool,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            istart: 1,
            rot: AngularRange::new(0.0, 360.0, 10.0),
            tilt: AngularRange::new(0.0, 180.0, 10.0),
            psi: AngularRange::new(0.0, 350.0, 10.0),
            search_radius: 0.0,
            sigma_offset: 3.0,
            lowres: -1.0,
            highres: -1.0,
            frozen: Frozen::default(),
            parallel: true,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be at least 1".into()).into());
        }
        self.rot.validate("rot")?;
        self.tilt.validate("tilt")?;
        self.psi.validate("psi")?;
        for (name, value) in [
            ("search_radius", self.search_radius),
            ("sigma_offset", self.sigma_offset),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::Negative { name, value }.into());
            }
        }
        for (name, value) in [("lowres", self.lowres), ("highres", self.highres)] {
            if value > 0.5 {
                return Err(ConfigError::ResolutionOutOfRange { name, value }.into());
            }
        }
        let low = if self.lowres < 0.0 { 0.0 } else { self.lowres };
        let high = if self.highres < 0.0 { 0.5 } else { self.highres };
        if low >= high {
            return Err(ConfigError::Invalid(format!(
                "lowres {} must be below highres {}",
                low, high
            ))
            .into());
        }
        Ok(())
    }

    pub fn search_space(&self) -> SearchSpace {
        SearchSpace {
            rot: self.rot,
            tilt: self.tilt,
            psi: self.psi,
            search_radius: self.search_radius,
        }
    }

    pub fn band(&self, dim: usize) -> Result<ShellBand> {
        ShellBand::from_resolution(dim, self.lowres, self.highres)
    }
}
