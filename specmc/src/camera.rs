//! Gamma-camera heads: parametric parallel-hole collimator, scintillator
//! crystal, glass back-end and lead shielding.

use crate::error::{Error, Result};
use crate::geometry::BoxShape;
use crate::material::Material;
use crate::math::Vec3;
use crate::volume::{NodeId, ParametricMaterial, Scene, VolumeKind};
use std::sync::Arc;

/// A parallel-hole collimator as a Woodcock-parametric material: hexagonally
/// packed holes of vacuum in a septal material. The hole lattice repeats with
/// period `(D + s, √3·(D + s))` and a second, half-period-shifted test covers
/// the staggered rows.
pub struct ParallelCollimator {
    period: (f64, f64),
    corner: (f64, f64),
    slope: f64,
    ad: f64,
    ad_half: f64,
    vacuum: Material,
}

impl ParallelCollimator {
    /// Creates the hole lattice for the given hole diameter and septal
    /// thickness, both mm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for non-positive dimensions.
    pub fn new(hole_diameter: f64, septa: f64, vacuum: Material) -> Result<Self> {
        if hole_diameter <= 0.0 || septa <= 0.0 {
            return Err(Error::Config(
                "collimator hole diameter and septa must be positive".into(),
            ));
        }
        let x_period = hole_diameter + septa;
        let y_period = 3.0_f64.sqrt() * x_period;
        let slope = 3.0_f64.sqrt() / 4.0;
        let d = hole_diameter * 2.0 / 3.0_f64.sqrt();
        let ad = slope * d;
        Ok(Self {
            period: (x_period, y_period),
            corner: (x_period / 2.0, y_period / 2.0),
            slope,
            ad,
            ad_half: ad / 2.0,
            vacuum,
        })
    }

    fn in_hexagon(&self, x: f64, y: f64) -> bool {
        x <= self.ad && self.slope.mul_add(y, x / 4.0) <= self.ad_half
    }
}

impl ParametricMaterial for ParallelCollimator {
    fn material_at(&self, local: Vec3) -> Option<Material> {
        let px = local.x.rem_euclid(self.period.0);
        let py = local.y.rem_euclid(self.period.1);
        let qx = (px - self.corner.0).abs();
        let qy = (py - self.corner.1).abs();
        let mut hole = self.in_hexagon(qx, qy);
        if !hole {
            // staggered row: fold about the cell corner and test again
            let rx = (qx - self.corner.0).abs();
            let ry = (qy - self.corner.1).abs();
            hole = self.in_hexagon(rx, ry);
        }
        if hole {
            Some(self.vacuum.clone())
        } else {
            None
        }
    }
}

/// Dimensions of a gamma-camera head, all mm.
pub struct GammaCameraSpec {
    /// Collimator extents; `z` is the collimator thickness.
    pub collimator_size: Vec3,
    /// Collimator hole diameter.
    pub hole_diameter: f64,
    /// Collimator septal thickness.
    pub septa: f64,
    /// Scintillator crystal extents; `z` is the crystal thickness.
    pub detector_size: Vec3,
    /// Lead shielding thickness around the sides and back.
    pub shielding_thickness: f64,
    /// Glass back-end thickness.
    pub glass_thickness: f64,
}

/// Materials a camera head is built from.
pub struct GammaCameraMaterials {
    /// Shielding, typically lead.
    pub shielding: Material,
    /// The housing filler, typically air.
    pub housing: Material,
    /// Septal material, typically lead.
    pub collimator: Material,
    /// Scintillator, typically NaI.
    pub crystal: Material,
    /// Back-end, typically borosilicate glass.
    pub glass: Material,
    /// Hole filler for the collimator lattice.
    pub vacuum: Material,
}

/// Node handles of one assembled camera head.
pub struct GammaCamera {
    /// The shielded head, child of the simulation volume.
    pub camera: NodeId,
    /// The air-filled housing inside the shielding.
    pub detector_box: NodeId,
    /// The parametric collimator.
    pub collimator: NodeId,
    /// The scintillator crystal; the sensitive volume.
    pub detector: NodeId,
    /// The glass back-end.
    pub glass: NodeId,
}

/// Assembles one camera head under `parent`: an open-faced lead box housing
/// the collimator, crystal and glass stacked front to back along +z. The
/// head is created at the parent origin facing +z; place it with
/// [`Scene::rotate`] and [`Scene::translate`].
///
/// # Errors
///
/// Returns [`Error::Config`] for inconsistent dimensions.
pub fn add_gamma_camera(
    scene: &mut Scene,
    parent: NodeId,
    name: &str,
    spec: &GammaCameraSpec,
    materials: &GammaCameraMaterials,
) -> Result<GammaCamera> {
    let box_size = Vec3::new(
        spec.collimator_size.x.max(spec.detector_size.x),
        spec.collimator_size.y.max(spec.detector_size.y),
        spec.collimator_size.z + spec.detector_size.z + spec.glass_thickness,
    );
    let shield = spec.shielding_thickness;
    let camera = scene.add_volume(
        parent,
        name,
        BoxShape::new(
            box_size.x + 2.0 * shield,
            box_size.y + 2.0 * shield,
            box_size.z + shield,
        ),
        materials.shielding.clone(),
        VolumeKind::Plain,
    )?;
    let detector_box = scene.add_volume(
        camera,
        &format!("{name}/housing"),
        BoxShape::new(box_size.x, box_size.y, box_size.z),
        materials.housing.clone(),
        VolumeKind::Plain,
    )?;
    // flush with the open +z face, lead behind the glass
    scene.translate(detector_box, Vec3::new(0.0, 0.0, shield / 2.0))?;

    let lattice = ParallelCollimator::new(spec.hole_diameter, spec.septa, materials.vacuum.clone())?;
    let collimator = scene.add_volume(
        detector_box,
        &format!("{name}/collimator"),
        BoxShape::new(
            spec.collimator_size.x,
            spec.collimator_size.y,
            spec.collimator_size.z,
        ),
        materials.collimator.clone(),
        VolumeKind::Parametric(Arc::new(lattice)),
    )?;
    scene.translate(
        collimator,
        Vec3::new(0.0, 0.0, (box_size.z - spec.collimator_size.z) / 2.0),
    )?;

    let detector = scene.add_volume(
        detector_box,
        &format!("{name}/crystal"),
        BoxShape::new(
            spec.detector_size.x,
            spec.detector_size.y,
            spec.detector_size.z,
        ),
        materials.crystal.clone(),
        VolumeKind::Plain,
    )?;
    scene.translate(
        detector,
        Vec3::new(
            0.0,
            0.0,
            box_size.z / 2.0 - spec.collimator_size.z - spec.detector_size.z / 2.0,
        ),
    )?;

    let glass = scene.add_volume(
        detector_box,
        &format!("{name}/glass"),
        BoxShape::new(box_size.x, box_size.y, spec.glass_thickness),
        materials.glass.clone(),
        VolumeKind::Plain,
    )?;
    scene.translate(
        glass,
        Vec3::new(
            0.0,
            0.0,
            box_size.z / 2.0
                - spec.collimator_size.z
                - spec.detector_size.z
                - spec.glass_thickness / 2.0,
        ),
    )?;

    Ok(GammaCamera {
        camera,
        detector_box,
        collimator,
        detector,
        glass,
    })
}
