//! Voxelized phantom inputs: material-id grids for attenuation phantoms and
//! activity grids for source distributions.

use crate::error::{Error, Result};
use crate::material::{Material, MaterialDatabase};
use ndarray::Array3;
use ndarray_npy::read_npy;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::Path;

/// Loads a 3-D `u8` material-id phantom from a `.npy` file.
///
/// # Errors
///
/// Returns [`Error::Data`] if the file cannot be read or has the wrong
/// element type or rank.
pub fn load_material_ids(path: &Path) -> Result<Array3<u8>> {
    read_npy(path).map_err(|err| Error::Data(format!("cannot read {}: {err}", path.display())))
}

/// Loads a 3-D `f32` activity distribution from a `.npy` file.
///
/// # Errors
///
/// Returns [`Error::Data`] if the file cannot be read or has the wrong
/// element type or rank.
pub fn load_activity(path: &Path) -> Result<Array3<f32>> {
    read_npy(path).map_err(|err| Error::Data(format!("cannot read {}: {err}", path.display())))
}

/// Resolves a phantom's id → material-name mapping against the material
/// database, for feeding a voxel volume.
///
/// # Errors
///
/// Returns [`Error::Data`] for a name absent from the database.
pub fn resolve_id_mapping(
    names: &BTreeMap<u8, String>,
    materials: &MaterialDatabase,
) -> Result<FxHashMap<u8, Material>> {
    names
        .iter()
        .map(|(&id, name)| Ok((id, materials.get(name)?)))
        .collect()
}
