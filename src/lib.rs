//! Maximum-likelihood multi-reference alignment and classification of
//! sub-tomograms with a missing wedge, scored in Fourier space against a
//! per-shell Gaussian noise model.

pub mod accum;
pub mod config;
pub mod error;
pub mod estep;
pub mod fourier;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod mstep;
pub mod noise;
pub mod postprocess;
pub mod refine;
pub mod symmetry;
pub mod volume;
pub mod wedge;

pub use config::RefineConfig;
pub use error::{ConfigError, MlfError, NumericalError, Result};
pub use geometry::{EulerAngles, Rot3};
pub use model::{Model, Particle, ParticleFit};
pub use refine::{IterationLog, IterationSummary, Refiner};
pub use volume::Volume;
pub use wedge::MissingWedge;
