use thiserror::Error;

/// Failures of the refinement core.
///
/// Nothing here is retryable: a configuration problem aborts the run before
/// the first iteration, a numerical degeneracy aborts the iteration in which
/// it is detected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MlfError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("numerical degeneracy: {0}")]
    Numerical(#[from] NumericalError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{what} has shape {shape:?}, expected a cube of dimension {dim}")]
    DimensionMismatch {
        what: String,
        shape: Vec<usize>,
        dim: usize,
    },
    #[error("volumes must be cubic, got shape {0:?}")]
    NotCubic(Vec<usize>),
    #[error("{name} = {value} must not exceed 0.5 (Nyquist)")]
    ResolutionOutOfRange { name: &'static str, value: f64 },
    #[error("empty resolution band: lowres shell {min} >= highres shell {max}")]
    EmptyResolutionBand { min: usize, max: usize },
    #[error("wedge {0} is not defined in the wedge table")]
    UnknownWedge(i64),
    #[error("wedge {0} is defined more than once")]
    DuplicateWedge(i64),
    #[error("invalid {axis} range: start={start} end={end} step={step}")]
    AngularRange {
        axis: &'static str,
        start: f64,
        end: f64,
        step: f64,
    },
    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("unknown symmetry group descriptor '{0}'")]
    Symmetry(String),
    #[error("{what} has {found} entries, expected {expected}")]
    TableLength {
        what: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericalError {
    #[error("particle '{0}': every hypothesis has negligible weight")]
    ZeroParticleWeight(String),
    #[error("total responsibility over all classes is zero")]
    ZeroTotalResponsibility,
}

pub type Result<T> = std::result::Result<T, MlfError>;
