#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! Monte Carlo simulation of gamma-photon transport through heterogeneous
//! voxelized media, aimed at SPECT imaging studies: photons are emitted from
//! a voxelized activity distribution, transported through a scene of nested
//! volumes — phantoms, collimators, crystals — with Woodcock delta-tracking
//! inside voxelized regions, and every interaction inside a sensitive volume
//! is streamed to a caller-provided sink.

pub mod attenuation;
pub mod camera;
pub mod error;
pub mod geometry;
pub mod material;
pub mod math;
pub mod nonunique;
pub mod particle;
pub mod phantom;
pub mod process;
pub mod propagation;
pub mod record;
pub mod rng;
pub mod simulation;
pub mod source;
pub mod units;
pub mod volume;

pub use error::{Error, Result};
