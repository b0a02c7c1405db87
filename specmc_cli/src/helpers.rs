use anyhow::{Context, Result};
use ndarray::Array3;
use serde::Deserialize;
use specmc::camera::{add_gamma_camera, GammaCamera, GammaCameraMaterials, GammaCameraSpec};
use specmc::geometry::BoxShape;
use specmc::material::MaterialDatabase;
use specmc::math::Vec3;
use specmc::phantom::resolve_id_mapping;
use specmc::units::{CM, MM};
use specmc::volume::{Scene, VolumeKind, VoxelGrid};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Camera-head dimensions, mm; the defaults are a typical low-energy
/// high-resolution head.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub detector_width: f64,
    pub detector_height: f64,
    pub detector_thickness: f64,
    pub collimator_thickness: f64,
    pub hole_diameter: f64,
    pub septa: f64,
    pub shielding_thickness: f64,
    pub glass_thickness: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            detector_width: 54.0 * CM,
            detector_height: 40.0 * CM,
            detector_thickness: 0.95 * CM,
            collimator_thickness: 3.5 * CM,
            hole_diameter: 1.5 * MM,
            septa: 0.2 * MM,
            shielding_thickness: 2.0 * CM,
            glass_thickness: 7.6 * CM,
        }
    }
}

/// Scene material names, resolved against the material table.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneMaterials {
    pub world: String,
    pub shielding: String,
    pub collimator: String,
    pub crystal: String,
    pub glass: String,
}

impl Default for SceneMaterials {
    fn default() -> Self {
        Self {
            world: "Air, Dry (near sea level)".into(),
            shielding: "Pb".into(),
            collimator: "Pb".into(),
            crystal: "Sodium Iodide".into(),
            glass: "Glass, Borosilicate (Pyrex)".into(),
        }
    }
}

fn default_simulation_volume() -> [f64; 3] {
    [120.0 * CM, 120.0 * CM, 80.0 * CM]
}

fn default_sink_buffer() -> usize {
    10_000
}

fn default_particles_per_batch() -> usize {
    1_000_000
}

fn default_isotope() -> String {
    "Tc-99m".into()
}

/// One run's configuration file. Lengths are mm, times seconds, activities
/// MBq, angles degrees.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Number of projection views over the angular range.
    pub views: usize,
    /// Camera heads simulated together per view.
    pub cameras_per_view: usize,
    /// Ring radius from the axis to the camera face, mm.
    pub radius: f64,
    #[serde(default)]
    pub angle_start: f64,
    #[serde(default = "default_angle_range")]
    pub angle_range: f64,
    #[serde(default)]
    pub time_start: f64,
    pub time_stop: f64,
    #[serde(default = "default_time_slices")]
    pub time_slices: usize,
    pub pool_size: usize,
    #[serde(default = "default_isotope")]
    pub isotope: String,
    /// Initial activity, MBq.
    pub activity: f64,
    #[serde(default = "default_particles_per_batch")]
    pub particles_per_batch: usize,
    pub seed: u64,
    pub materials_table: PathBuf,
    pub attenuation_table: PathBuf,
    pub activity_phantom: PathBuf,
    pub attenuation_phantom: PathBuf,
    /// Phantom voxel size, mm.
    pub phantom_voxel_size: f64,
    /// Phantom material ids → material names.
    pub phantom_materials: BTreeMap<u8, String>,
    pub output_dir: PathBuf,
    #[serde(default = "default_simulation_volume")]
    pub simulation_volume: [f64; 3],
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub materials: SceneMaterials,
    #[serde(default = "default_sink_buffer")]
    pub sink_buffer: usize,
}

fn default_angle_range() -> f64 {
    360.0
}

fn default_time_slices() -> usize {
    1
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let fail = |message: &str| -> Result<()> { Err(specmc::Error::Config(message.into()).into()) };
        if self.views == 0 || self.cameras_per_view == 0 {
            return fail("views and cameras_per_view must be positive");
        }
        if self.views % self.cameras_per_view != 0 {
            return fail("views must be divisible by cameras_per_view");
        }
        if self.radius <= 0.0 || self.phantom_voxel_size <= 0.0 {
            return fail("radius and phantom_voxel_size must be positive");
        }
        if self.activity <= 0.0 {
            return fail("activity must be positive");
        }
        if self.time_stop < self.time_start {
            return fail("time_stop must not precede time_start");
        }
        if self.time_slices == 0 || self.pool_size == 0 {
            return fail("time_slices and pool_size must be positive");
        }
        Ok(())
    }

    /// Angles of the independent view tasks, radians.
    #[must_use]
    pub fn task_angles(&self) -> Vec<f64> {
        let step = self.angle_range.to_radians() / self.views as f64;
        let start = self.angle_start.to_radians();
        (0..self.views / self.cameras_per_view)
            .map(|i| (i as f64).mul_add(step, start))
            .collect()
    }

    /// Angle between the heads of one view, radians.
    #[must_use]
    pub fn head_separation(&self) -> f64 {
        self.angle_range.to_radians() / self.cameras_per_view as f64
    }

    /// The `[start, stop]` pairs of the simulated time slices, seconds.
    #[must_use]
    pub fn time_intervals(&self) -> Vec<(f64, f64)> {
        let width = (self.time_stop - self.time_start) / self.time_slices as f64;
        (0..self.time_slices)
            .map(|i| {
                let start = (i as f64).mul_add(width, self.time_start);
                (start, start + width)
            })
            .collect()
    }
}

/// A built per-task scene: the world with phantom and camera ring, plus the
/// sensitive crystal volumes.
pub struct BuiltScene {
    pub scene: Scene,
    pub detectors: Vec<GammaCamera>,
}

/// Builds one view's scene: the simulation volume, the voxelized attenuation
/// phantom at its centre and `cameras_per_view` heads on the ring starting at
/// `angle`.
pub fn build_scene(
    config: &RunConfig,
    materials: &MaterialDatabase,
    phantom_ids: &Array3<u8>,
    angle: f64,
) -> Result<BuiltScene> {
    let world = materials.get(&config.materials.world)?;
    let mut scene = Scene::new(
        BoxShape::new(
            config.simulation_volume[0],
            config.simulation_volume[1],
            config.simulation_volume[2],
        ),
        world.clone(),
        materials.vacuum(),
        "Simulation volume",
    );

    let mapping = resolve_id_mapping(&config.phantom_materials, materials)?;
    let grid = VoxelGrid::from_ids(
        phantom_ids,
        config.phantom_voxel_size,
        &mapping,
        materials.vacuum(),
    )?;
    let grid_size = grid.size();
    let root = scene.root();
    scene.add_volume(
        root,
        "Phantom",
        BoxShape::new(grid_size.x, grid_size.y, grid_size.z),
        materials.vacuum(),
        VolumeKind::Voxel(grid),
    )?;

    let camera_materials = GammaCameraMaterials {
        shielding: materials.get(&config.materials.shielding)?,
        housing: world,
        collimator: materials.get(&config.materials.collimator)?,
        crystal: materials.get(&config.materials.crystal)?,
        glass: materials.get(&config.materials.glass)?,
        vacuum: materials.vacuum(),
    };
    let spec = GammaCameraSpec {
        collimator_size: Vec3::new(
            config.camera.detector_width,
            config.camera.detector_height,
            config.camera.collimator_thickness,
        ),
        hole_diameter: config.camera.hole_diameter,
        septa: config.camera.septa,
        detector_size: Vec3::new(
            config.camera.detector_width,
            config.camera.detector_height,
            config.camera.detector_thickness,
        ),
        shielding_thickness: config.camera.shielding_thickness,
        glass_thickness: config.camera.glass_thickness,
    };
    let camera_depth = config.camera.collimator_thickness
        + config.camera.detector_thickness
        + config.camera.glass_thickness
        + config.camera.shielding_thickness;

    let mut detectors = Vec::with_capacity(config.cameras_per_view);
    for i in 0..config.cameras_per_view {
        let head_angle = (i as f64).mul_add(config.head_separation(), angle);
        let name = format!("Gamma camera at {:.1} deg", head_angle.to_degrees());
        let head = add_gamma_camera(&mut scene, root, &name, &spec, &camera_materials)?;
        // face the camera towards the axis, push it out to the ring and
        // swing it to its view angle
        scene.rotate(head.camera, 0.0, 0.0, std::f64::consts::FRAC_PI_2, Vec3::ZERO)?;
        scene.translate(
            head.camera,
            Vec3::new(0.0, config.radius + camera_depth / 2.0, 0.0),
        )?;
        scene.rotate(head.camera, head_angle, 0.0, 0.0, Vec3::ZERO)?;
        detectors.push(head);
    }
    Ok(BuiltScene { scene, detectors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_standard_head() {
        let camera = CameraConfig::default();
        assert!(camera.hole_diameter < camera.detector_width);
        assert!((camera.collimator_thickness - 35.0).abs() < 1e-12);
    }

    #[test]
    fn task_angles_cover_the_range_once() {
        let yaml = r"
views: 8
cameras_per_view: 4
radius: 200.0
time_stop: 5.0
pool_size: 2
activity: 200.0
seed: 7
materials_table: tables/materials.yaml
attenuation_table: tables/attenuation.yaml
activity_phantom: phantoms/activity.npy
attenuation_phantom: phantoms/attenuation.npy
phantom_voxel_size: 4.0
phantom_materials:
  0: Vacuum
output_dir: out
";
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let angles = config.task_angles();
        assert_eq!(angles.len(), 2);
        assert!((angles[1] - 45.0_f64.to_radians()).abs() < 1e-12);
        assert!((config.head_separation() - 90.0_f64.to_radians()).abs() < 1e-12);
        let intervals = config.time_intervals();
        assert_eq!(intervals.len(), 1);
        assert!((intervals[0].1 - 5.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_configs_are_rejected_before_workers_start() {
        let yaml = r"
views: 7
cameras_per_view: 4
radius: 200.0
time_stop: 5.0
pool_size: 2
activity: 200.0
seed: 7
materials_table: t.yaml
attenuation_table: a.yaml
activity_phantom: a.npy
attenuation_phantom: b.npy
phantom_voxel_size: 4.0
phantom_materials: {}
output_dir: out
";
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
