use thiserror::Error;

/// Errors raised while building or solving the car rental problem.
#[derive(Error, Debug)]
pub enum RentalError {
    /// A sweep or round cap was hit before the convergence criterion held.
    #[error("{what} did not converge within {cap} iterations (last delta {delta:.6})")]
    Divergence {
        what: &'static str,
        cap: usize,
        delta: f64,
    },
    #[error("state ({n1}, {n2}) is outside [0, {max_cars}]")]
    InvalidState { n1: i32, n2: i32, max_cars: u8 },
    /// Single-location form of `InvalidState`, raised by per-lot table lookups.
    #[error("lot count {count} is outside [0, {max_cars}]")]
    InvalidLotCount { count: usize, max_cars: u8 },
    #[error("table has shape {found:?}, expected {expected:?}")]
    TableShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("count {0} must be non-negative")]
    Domain(i64),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read configuration file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: config_file::ConfigFileError,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, RentalError>;
