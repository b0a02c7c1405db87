//! Error types shared across the crate.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A run was configured with inconsistent or out-of-range parameters.
    /// Reported before any worker starts.
    #[error("configuration error: {0}")]
    Config(String),
    /// A data table could not be loaded or fails its structural invariants.
    /// Fatal at database construction.
    #[error("data error: {0}")]
    Data(String),
    /// A photon energy fell outside a tabulated energy grid. The offending
    /// photon is dropped at the next filter pass; not fatal.
    #[error("energy {energy} MeV outside tabulated range [{min}, {max}] MeV")]
    EnergyOutOfRange {
        /// The queried energy, in MeV.
        energy: f64,
        /// Lower end of the tabulated grid, in MeV.
        min: f64,
        /// Upper end of the tabulated grid, in MeV.
        max: f64,
    },
    /// A numerical invariant was violated (for instance a direction that is
    /// no longer unit-norm after rotation). Logged; the photon is dropped.
    #[error("numerical error: {0}")]
    Numerical(String),
    /// Propagated from a [`Sink`](crate::record::Sink); terminates the owning
    /// simulation manager, other workers continue.
    #[error("sink failure: {0}")]
    Sink(String),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type with this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
