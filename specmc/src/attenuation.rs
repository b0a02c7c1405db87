//! Attenuation coefficient tables and their interpolation.
//!
//! Per-element mass attenuation coefficients are combined into one
//! strictly-monotone energy grid per material; the linear coefficient is
//! obtained at query time by multiplying with the material density.

use crate::error::{Error, Result};
use crate::material::{element_symbol, Material, MaterialBatch, MaterialDatabase};
use crate::units::{CM2_PER_G, EV};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// The photon interaction processes with tabulated coefficients.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProcessKind {
    /// Photoelectric absorption.
    Photoelectric,
    /// Incoherent (Compton) scattering.
    Incoherent,
    /// Coherent (Rayleigh) scattering.
    Coherent,
}

impl ProcessKind {
    /// All tabulated processes, in table-column order.
    pub const ALL: [Self; 3] = [Self::Photoelectric, Self::Incoherent, Self::Coherent];

    /// The column name used in the attenuation table file.
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Photoelectric => "Photoelectric absorption",
            Self::Incoherent => "Incoherent scattering",
            Self::Coherent => "Coherent scattering",
        }
    }

    /// The process name written into interaction records.
    #[must_use]
    pub const fn process_name(self) -> &'static str {
        match self {
            Self::Photoelectric => "PhotoelectricEffect",
            Self::Incoherent => "ComptonScattering",
            Self::Coherent => "CoherentScattering",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Photoelectric => 0,
            Self::Incoherent => 1,
            Self::Coherent => 2,
        }
    }
}

/// One element's block of the attenuation table file: energies in MeV and one
/// mass-attenuation column per process in cm²/g. Duplicate energies mark
/// absorption edges.
#[derive(Clone, Debug, Deserialize)]
pub struct ElementRecord {
    /// Tabulated energies, MeV, non-decreasing.
    #[serde(rename = "Energy")]
    pub energy: Vec<f64>,
    /// Photoelectric absorption column, cm²/g.
    #[serde(rename = "Photoelectric absorption")]
    pub photoelectric: Vec<f64>,
    /// Incoherent scattering column, cm²/g.
    #[serde(rename = "Incoherent scattering")]
    pub incoherent: Vec<f64>,
    /// Coherent scattering column, cm²/g.
    #[serde(rename = "Coherent scattering")]
    pub coherent: Vec<f64>,
}

impl ElementRecord {
    fn column(&self, process: ProcessKind) -> &[f64] {
        match process {
            ProcessKind::Photoelectric => &self.photoelectric,
            ProcessKind::Incoherent => &self.incoherent,
            ProcessKind::Coherent => &self.coherent,
        }
    }
}

/// The attenuation table file: element symbol → per-element record.
pub type ElementTable = BTreeMap<String, ElementRecord>;

/// Reads a YAML attenuation table from `path`.
///
/// # Errors
///
/// Returns [`Error::Data`] if the file cannot be read or parsed.
pub fn load_element_table(path: &Path) -> Result<ElementTable> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| Error::Data(format!("cannot read {}: {err}", path.display())))?;
    serde_yaml::from_str(&text)
        .map_err(|err| Error::Data(format!("cannot parse {}: {err}", path.display())))
}

/// Linear interpolation with end clamping, used only while accumulating
/// element columns onto the union grid.
fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    match xs.binary_search_by(|probe| probe.total_cmp(&x)) {
        Ok(i) => ys[i],
        Err(0) => ys[0],
        Err(i) if i == xs.len() => ys[ys.len() - 1],
        Err(i) => {
            let t = (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
            ys[i - 1] + t * (ys[i] - ys[i - 1])
        }
    }
}

/// A material's combined table: one strictly-monotone energy grid and one
/// mass-coefficient column (mm²/g) per process.
#[derive(Clone, Debug)]
struct MaterialRecord {
    energy: Vec<f64>,
    mac: [Vec<f64>; 3],
    /// Original absorption-edge energies, for diagnostics.
    edges: Vec<f64>,
}

impl MaterialRecord {
    fn build(material: &Material, elements: &ElementTable) -> Result<Self> {
        let mut grid: Vec<f64> = Vec::new();
        let mut mac: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut edges = Vec::new();

        for &(z, weight) in material.composition() {
            let symbol = element_symbol(z)
                .ok_or_else(|| Error::Data(format!("no element with Z = {z}")))?;
            let record = elements.get(symbol).ok_or_else(|| {
                Error::Data(format!("attenuation table has no element {symbol}"))
            })?;
            let n = record.energy.len();
            for process in ProcessKind::ALL {
                if record.column(process).len() != n {
                    return Err(Error::Data(format!(
                        "element {symbol}: {} column length mismatch",
                        process.column_name()
                    )));
                }
            }

            // absorption edges appear as duplicated energies; displace the
            // lower of each pair so the grid becomes strictly monotone
            let mut energy = record.energy.clone();
            for i in 0..n.saturating_sub(1) {
                if energy[i] >= energy[i + 1] {
                    edges.push(energy[i + 1]);
                    energy[i] = energy[i + 1] - 1.0 * EV;
                }
            }
            if energy.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::Data(format!(
                    "element {symbol}: energy grid not monotone after edge displacement"
                )));
            }

            if grid.is_empty() {
                grid = energy;
                for process in ProcessKind::ALL {
                    mac[process.index()] = record
                        .column(process)
                        .iter()
                        .map(|&c| c * CM2_PER_G * weight)
                        .collect();
                }
                continue;
            }

            let mut union: Vec<f64> = grid.iter().merge(&energy).copied().collect();
            union.dedup();
            for process in ProcessKind::ALL {
                let column: Vec<f64> = record
                    .column(process)
                    .iter()
                    .map(|&c| c * CM2_PER_G * weight)
                    .collect();
                let accumulated = std::mem::take(&mut mac[process.index()]);
                mac[process.index()] = union
                    .iter()
                    .map(|&e| {
                        interp_clamped(e, &grid, &accumulated)
                            + interp_clamped(e, &energy, &column)
                    })
                    .collect();
            }
            grid = union;
        }

        edges.sort_by(f64::total_cmp);
        edges.dedup();
        Ok(Self {
            energy: grid,
            mac,
            edges,
        })
    }

    fn mac_at(&self, process: ProcessKind, energy: f64) -> Option<f64> {
        let grid = &self.energy;
        if grid.is_empty() || energy < grid[0] || energy > grid[grid.len() - 1] {
            return None;
        }
        Some(interp_clamped(energy, grid, &self.mac[process.index()]))
    }
}

/// Per-material tabulated mass attenuation coefficients for every registered
/// material, keyed by the material's database id.
pub struct AttenuationDatabase {
    records: Vec<MaterialRecord>,
}

impl AttenuationDatabase {
    /// Builds the combined tables for every material in `materials`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if an element is missing from the table or a
    /// grid cannot be made strictly monotone.
    pub fn build(materials: &MaterialDatabase, elements: &ElementTable) -> Result<Self> {
        let records = materials
            .iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|material| MaterialRecord::build(material, elements))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { records })
    }

    fn record(&self, material: &Material) -> Result<&MaterialRecord> {
        self.records
            .get(material.id() as usize)
            .ok_or_else(|| Error::Data(format!("material {material} not in attenuation database")))
    }

    /// Tabulated energy range for `material`, MeV.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] for a material that was not registered at
    /// build time.
    pub fn energy_range(&self, material: &Material) -> Result<(f64, f64)> {
        let record = self.record(material)?;
        Ok((record.energy[0], record.energy[record.energy.len() - 1]))
    }

    /// The displaced absorption-edge energies of `material`, MeV.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] for an unregistered material.
    pub fn edges(&self, material: &Material) -> Result<&[f64]> {
        Ok(&self.record(material)?.edges)
    }

    /// Mass attenuation coefficient (mm²/g) by piecewise-linear interpolation
    /// in energy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnergyOutOfRange`] outside the tabulated grid.
    pub fn mac(&self, material: &Material, process: ProcessKind, energy: f64) -> Result<f64> {
        let record = self.record(material)?;
        record.mac_at(process, energy).ok_or(Error::EnergyOutOfRange {
            energy,
            min: record.energy[0],
            max: record.energy[record.energy.len() - 1],
        })
    }

    /// Linear attenuation coefficient (1/mm): the mass coefficient times the
    /// material density.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnergyOutOfRange`] outside the tabulated grid.
    pub fn lac(&self, material: &Material, process: ProcessKind, energy: f64) -> Result<f64> {
        Ok(self.mac(material, process, energy)? * material.density())
    }

    /// Fills `out` with per-photon linear attenuation coefficients for the
    /// materials of `batch` at `energies`, restricted to `[min, max]`.
    /// Photons whose energy is out of range (of the window or the table) get
    /// a zero coefficient so they stream freely until the next validity
    /// filter drops them; the number of such photons is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] for an unregistered material.
    pub fn lac_into(
        &self,
        batch: &MaterialBatch,
        process: ProcessKind,
        (min, max): (f64, f64),
        energies: &[f64],
        out: &mut [f64],
    ) -> Result<usize> {
        assert_eq!(energies.len(), out.len());
        assert_eq!(batch.len(), out.len());
        out.fill(0.0);
        let mut out_of_range = 0;
        for (material, rows) in batch.inverse() {
            let record = self.record(&material)?;
            let density = material.density();
            for row in rows {
                let energy = energies[row];
                if energy < min || energy > max {
                    out_of_range += 1;
                    continue;
                }
                match record.mac_at(process, energy) {
                    Some(mac) => out[row] = mac * density,
                    None => out_of_range += 1,
                }
            }
        }
        Ok(out_of_range)
    }

    /// Like [`Self::lac_into`] but touching only the listed rows, used when
    /// Woodcock tracking re-resolves the real material at a candidate
    /// interaction point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] for an unregistered material.
    pub fn lac_rows(
        &self,
        batch: &MaterialBatch,
        process: ProcessKind,
        (min, max): (f64, f64),
        energies: &[f64],
        rows: &[usize],
        out: &mut [f64],
    ) -> Result<usize> {
        let mut out_of_range = 0;
        for &row in rows {
            let material = batch.get(row);
            let energy = energies[row];
            if energy < min || energy > max {
                out[row] = 0.0;
                out_of_range += 1;
                continue;
            }
            let record = self.record(material)?;
            match record.mac_at(process, energy) {
                Some(mac) => out[row] = mac * material.density(),
                None => {
                    out[row] = 0.0;
                    out_of_range += 1;
                }
            }
        }
        Ok(out_of_range)
    }
}
