//! Materials and the process-wide material database.

use crate::error::{Error, Result};
use crate::nonunique::NonuniqueMap;
use crate::units::G_PER_CM3;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

/// Number of tabulated elements plus the unused index 0.
pub const ATOMIC_NUMBERS: usize = 93;

/// Element symbols indexed by atomic number; index 0 is unused.
const SYMBOLS: [&str; ATOMIC_NUMBERS] = [
    "", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge",
    "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd",
    "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd",
    "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg",
    "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U",
];

/// Atomic number for an element symbol, or `None` for an unknown symbol.
#[must_use]
pub fn atomic_number(symbol: &str) -> Option<u8> {
    SYMBOLS
        .iter()
        .position(|&s| s == symbol && !s.is_empty())
        .map(|z| u8::try_from(z).unwrap_or_else(|_| unreachable!()))
}

/// Element symbol for an atomic number in `1..=92`.
#[must_use]
pub fn element_symbol(z: u8) -> Option<&'static str> {
    SYMBOLS.get(z as usize).copied().filter(|s| !s.is_empty())
}

/// How a material is composed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaterialKind {
    /// A single element.
    Element,
    /// A chemical compound with fixed stoichiometry.
    Compound,
    /// A mixture of compounds/elements by mass.
    Mixture,
}

#[derive(Debug)]
struct MaterialData {
    name: String,
    kind: MaterialKind,
    /// g/mm³.
    density: f64,
    /// (Z, mass fraction) pairs, fractions summing to 1.
    composition: Vec<(u8, f64)>,
    z_to_a_ratio: f64,
    id: u16,
}

/// An immutable material record. Cheap to clone: the payload is shared, and
/// equality/hashing go by the small database-unique id, so equal materials
/// returned by one database compare as the same value.
#[derive(Clone, Debug)]
pub struct Material(Arc<MaterialData>);

impl Material {
    /// Material name, unique within its database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether this is an element, compound or mixture.
    #[must_use]
    pub fn kind(&self) -> MaterialKind {
        self.0.kind
    }

    /// Density in g/mm³.
    #[must_use]
    pub fn density(&self) -> f64 {
        self.0.density
    }

    /// Ratio of atomic number to mass number.
    #[must_use]
    pub fn z_to_a_ratio(&self) -> f64 {
        self.0.z_to_a_ratio
    }

    /// Small stable id, unique within the owning database; 0 is `Vacuum`.
    #[must_use]
    pub fn id(&self) -> u16 {
        self.0.id
    }

    /// Returns `true` for the database's distinguished `Vacuum` entry.
    #[must_use]
    pub fn is_vacuum(&self) -> bool {
        self.0.id == 0
    }

    /// `(Z, mass fraction)` pairs of the composition.
    #[must_use]
    pub fn composition(&self) -> &[(u8, f64)] {
        &self.0.composition
    }

    /// Mass-fraction-weighted sum of atomic numbers.
    #[must_use]
    pub fn zeff(&self) -> f64 {
        self.0
            .composition
            .iter()
            .map(|&(z, w)| f64::from(z) * w)
            .sum()
    }

    /// Length-93 composition vector indexed by Z, for inner products with
    /// tabulated per-element coefficients.
    #[must_use]
    pub fn composition_as_array(&self) -> [f64; ATOMIC_NUMBERS] {
        let mut array = [0.0; ATOMIC_NUMBERS];
        for &(z, w) in &self.0.composition {
            array[z as usize] += w;
        }
        array
    }

    /// Ordering key for majorant selection under Woodcock tracking:
    /// `Zeff · density`.
    #[must_use]
    pub fn woodcock_key(&self) -> f64 {
        self.zeff() * self.density()
    }
}

impl PartialEq for Material {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Material {}

impl Hash for Material {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// A batch of per-photon materials in compact dictionary form; the sentinel
/// entry is the database's `Vacuum`.
pub type MaterialBatch = NonuniqueMap<Material>;

/// One entry of the on-disk material table: density in g/cm³, `Z` for
/// elemental media, `Composition` by mass fraction for everything else,
/// optional `Z/A`.
#[derive(Debug, Deserialize)]
pub struct MaterialEntry {
    /// Density in g/cm³.
    #[serde(rename = "Density")]
    pub density: f64,
    /// Atomic number, present for elemental media only.
    #[serde(rename = "Z")]
    pub z: Option<u8>,
    /// Element symbol → mass fraction, present for compounds/mixtures.
    #[serde(rename = "Composition")]
    pub composition: Option<BTreeMap<String, f64>>,
    /// Z/A ratio; defaults to 0.5 when absent.
    #[serde(rename = "Z/A")]
    pub z_to_a_ratio: Option<f64>,
}

/// The material table file: category group → material name → entry.
pub type MaterialTable = BTreeMap<String, BTreeMap<String, MaterialEntry>>;

const COMPOSITION_TOLERANCE: f64 = 1e-6;

/// Density assigned to `Vacuum`: effectively zero, in g/mm³.
const VACUUM_DENSITY: f64 = 0.4e-29 * G_PER_CM3;

/// A named process-wide collection of materials, built once at startup and
/// read-only afterwards. Entry 0 is always `Vacuum`.
pub struct MaterialDatabase {
    materials: Vec<Material>,
    by_name: FxHashMap<String, u16>,
}

impl MaterialDatabase {
    /// Builds a database from a deserialized material table. Materials are
    /// de-duplicated by name; the `Vacuum` entry is always inserted first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] on unknown element symbols, non-positive
    /// densities or compositions whose mass fractions do not sum to one.
    pub fn from_table(table: &MaterialTable) -> Result<Self> {
        let mut db = Self::empty();
        for (group, entries) in table {
            let kind = if group.contains("Elemental") {
                MaterialKind::Element
            } else if group.to_lowercase().contains("mixture") {
                MaterialKind::Mixture
            } else {
                MaterialKind::Compound
            };
            for (name, entry) in entries {
                db.insert(name, kind, entry)?;
            }
        }
        Ok(db)
    }

    /// Reads a YAML material table from `path` and builds the database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if the file cannot be read or parsed, plus
    /// everything [`Self::from_table`] rejects.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Data(format!("cannot read {}: {err}", path.display())))?;
        let table: MaterialTable = serde_yaml::from_str(&text)
            .map_err(|err| Error::Data(format!("cannot parse {}: {err}", path.display())))?;
        Self::from_table(&table)
    }

    /// A database containing only `Vacuum`.
    #[must_use]
    pub fn empty() -> Self {
        let vacuum = Material(Arc::new(MaterialData {
            name: "Vacuum".into(),
            kind: MaterialKind::Element,
            density: VACUUM_DENSITY,
            composition: vec![(1, 1.0)],
            z_to_a_ratio: 1.0,
            id: 0,
        }));
        let mut by_name = FxHashMap::default();
        by_name.insert("Vacuum".into(), 0);
        Self {
            materials: vec![vacuum],
            by_name,
        }
    }

    /// Inserts one material; an existing entry with the same name is returned
    /// unchanged instead (the database de-duplicates).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] for structurally invalid entries.
    pub fn insert(&mut self, name: &str, kind: MaterialKind, entry: &MaterialEntry) -> Result<Material> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(self.materials[id as usize].clone());
        }
        if entry.density <= 0.0 || !entry.density.is_finite() {
            return Err(Error::Data(format!("material {name}: bad density")));
        }
        let composition = match (entry.z, &entry.composition) {
            (Some(z), _) => {
                if element_symbol(z).is_none() {
                    return Err(Error::Data(format!("material {name}: Z = {z} out of range")));
                }
                vec![(z, 1.0)]
            }
            (None, Some(map)) => {
                let mut pairs = Vec::with_capacity(map.len());
                for (symbol, &weight) in map {
                    let z = atomic_number(symbol).ok_or_else(|| {
                        Error::Data(format!("material {name}: unknown element {symbol}"))
                    })?;
                    pairs.push((z, weight));
                }
                let total: f64 = pairs.iter().map(|&(_, w)| w).sum();
                if (total - 1.0).abs() > COMPOSITION_TOLERANCE {
                    return Err(Error::Data(format!(
                        "material {name}: mass fractions sum to {total}"
                    )));
                }
                pairs
            }
            (None, None) => {
                return Err(Error::Data(format!(
                    "material {name}: neither Z nor Composition given"
                )))
            }
        };
        let id = u16::try_from(self.materials.len())
            .map_err(|_| Error::Data("material database overflow".into()))?;
        let material = Material(Arc::new(MaterialData {
            name: name.into(),
            kind,
            density: entry.density * G_PER_CM3,
            composition,
            z_to_a_ratio: entry.z_to_a_ratio.unwrap_or(0.5),
            id,
        }));
        self.materials.push(material.clone());
        self.by_name.insert(name.into(), id);
        Ok(material)
    }

    /// The distinguished `Vacuum` entry.
    #[must_use]
    pub fn vacuum(&self) -> Material {
        self.materials[0].clone()
    }

    /// Looks a material up by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if no material with that name is registered.
    pub fn get(&self, name: &str) -> Result<Material> {
        self.by_name
            .get(name)
            .map(|&id| self.materials[id as usize].clone())
            .ok_or_else(|| Error::Data(format!("unknown material: {name}")))
    }

    /// Looks a material up by its small id.
    #[must_use]
    pub fn by_id(&self, id: u16) -> Option<Material> {
        self.materials.get(id as usize).cloned()
    }

    /// Number of registered materials, `Vacuum` included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Returns `true` if only `Vacuum` is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materials.len() <= 1
    }

    /// Iterates over all registered materials.
    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn water_entry() -> MaterialEntry {
        MaterialEntry {
            density: 1.0,
            z: None,
            composition: Some(
                [("H".to_string(), 0.111894), ("O".to_string(), 0.888106)]
                    .into_iter()
                    .collect(),
            ),
            z_to_a_ratio: Some(0.55509),
        }
    }

    #[test]
    fn symbols_round_trip() {
        assert_eq!(atomic_number("H"), Some(1));
        assert_eq!(atomic_number("Pb"), Some(82));
        assert_eq!(element_symbol(82), Some("Pb"));
        assert_eq!(atomic_number("Xx"), None);
        assert_eq!(element_symbol(0), None);
    }

    #[test]
    fn vacuum_is_always_present() {
        let db = MaterialDatabase::empty();
        let vacuum = db.vacuum();
        assert!(vacuum.is_vacuum());
        assert_eq!(vacuum.id(), 0);
        assert!(vacuum.density() < 1e-30);
    }

    #[test]
    fn zeff_is_mass_fraction_weighted() {
        let mut db = MaterialDatabase::empty();
        let water = db
            .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
            .unwrap();
        assert_approx_eq!(
            f64,
            water.zeff(),
            0.111894 + 8.0 * 0.888106,
            epsilon = 1e-12
        );
        let array = water.composition_as_array();
        assert_approx_eq!(f64, array[1], 0.111894, ulps = 2);
        assert_approx_eq!(f64, array[8], 0.888106, ulps = 2);
    }

    #[test]
    fn equal_materials_are_the_same_value() {
        let mut db = MaterialDatabase::empty();
        let first = db
            .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
            .unwrap();
        let second = db
            .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("Water, Liquid").unwrap(), first);
    }

    #[test]
    fn bad_composition_is_rejected() {
        let mut db = MaterialDatabase::empty();
        let entry = MaterialEntry {
            density: 1.0,
            z: None,
            composition: Some([("H".to_string(), 0.5)].into_iter().collect()),
            z_to_a_ratio: None,
        };
        assert!(db.insert("Broken", MaterialKind::Compound, &entry).is_err());
    }

    #[test]
    fn woodcock_ordering_prefers_heavier() {
        let mut db = MaterialDatabase::empty();
        let water = db
            .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
            .unwrap();
        let lead = db
            .insert(
                "Pb",
                MaterialKind::Element,
                &MaterialEntry {
                    density: 11.35,
                    z: Some(82),
                    composition: None,
                    z_to_a_ratio: None,
                },
            )
            .unwrap();
        assert!(lead.woodcock_key() > water.woodcock_key());
        assert!(db.vacuum().woodcock_key() < water.woodcock_key());
    }
}
