//! End-to-end transport scenarios with fixed seeds: narrow-beam attenuation,
//! photoelectric dose, Woodcock fictitious rates, decay timing and collimator
//! acceptance.

use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rustc_hash::{FxHashMap, FxHashSet};
use specmc::attenuation::{AttenuationDatabase, ElementRecord, ElementTable, ProcessKind};
use specmc::camera::ParallelCollimator;
use specmc::geometry::BoxShape;
use specmc::material::{Material, MaterialDatabase, MaterialEntry, MaterialKind};
use specmc::math::Vec3;
use specmc::particle::{ParticleBatch, PHOTON};
use specmc::process::{Photoelectric, Process};
use specmc::propagation::PropagationManager;
use specmc::record::NullSink;
use specmc::simulation::{drain_into, SimulationManager};
use specmc::source::{Isotope, Source};
use specmc::units::{CM, KEV, MBQ, MEV, MM};
use specmc::volume::{Scene, VolumeKind, VoxelGrid};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;

const BEAM_ENERGY: f64 = 140.5 * KEV;

/// Flat per-process columns over the transport window; every element carries
/// the same values so a compound's coefficient equals them regardless of
/// composition.
fn flat_record(photoelectric: f64, incoherent: f64, coherent: f64) -> ElementRecord {
    ElementRecord {
        energy: vec![1.0 * KEV, 1.0 * MEV],
        photoelectric: vec![photoelectric; 2],
        incoherent: vec![incoherent; 2],
        coherent: vec![coherent; 2],
    }
}

fn element_table(photoelectric: f64, incoherent: f64, coherent: f64) -> ElementTable {
    ["H", "O", "N", "Pb"]
        .into_iter()
        .map(|symbol| {
            (
                symbol.to_string(),
                flat_record(photoelectric, incoherent, coherent),
            )
        })
        .collect()
}

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

fn air_entry() -> MaterialEntry {
    MaterialEntry {
        density: 1.205e-3,
        z: None,
        composition: Some(
            [("N".to_string(), 0.755268), ("O".to_string(), 0.244732)]
                .into_iter()
                .collect(),
        ),
        z_to_a_ratio: None,
    }
}

fn lead_entry() -> MaterialEntry {
    MaterialEntry {
        density: 11.35,
        z: Some(82),
        composition: None,
        z_to_a_ratio: None,
    }
}

fn collimated_beam(n: usize, origin: Vec3, direction: Vec3) -> ParticleBatch {
    ParticleBatch::emitted(
        PHOTON,
        vec![origin; n],
        vec![direction.normalized(); n],
        vec![BEAM_ENERGY; n],
        vec![0.0; n],
    )
}

/// Transports a batch until it drains, marking each photon on its first
/// interaction and dropping it from the batch. Returns the number of photons
/// that never interacted.
fn count_survivors(
    manager: &mut PropagationManager,
    scene: &Scene,
    mut particles: ParticleBatch,
    world_half: f64,
) -> usize {
    let n = particles.len();
    let mut interacted: FxHashSet<u64> = FxHashSet::default();
    for _ in 0..10_000 {
        if particles.is_empty() {
            break;
        }
        let records = manager.step(&mut particles, scene).unwrap();
        for &id in &records.particle_id {
            interacted.insert(id);
        }
        let keep: Vec<bool> = (0..particles.len())
            .map(|i| {
                !interacted.contains(&particles.id[i])
                    && particles.position[i].x.abs() < world_half
                    && particles.position[i].y.abs() < world_half
                    && particles.position[i].z.abs() < world_half
            })
            .collect();
        particles.retain_rows(&keep);
    }
    assert!(particles.is_empty(), "transport loop did not drain");
    n - interacted.len()
}

/// Narrow-beam attenuation through 100 mm of water: the surviving fraction
/// matches exp(-μL) within a few binomial sigma.
#[test]
fn narrow_beam_attenuation_matches_exponential() {
    let mut materials = MaterialDatabase::empty();
    let water = materials
        .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
        .unwrap();
    // 0.1505 cm²/g total at unit density, the water value at the beam energy
    let elements = element_table(0.0042, 0.1398, 0.0065);
    let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements).unwrap());

    let mut scene = Scene::new(
        BoxShape::new(40.0 * CM, 40.0 * CM, 40.0 * CM),
        materials.vacuum(),
        materials.vacuum(),
        "world",
    );
    let slab = scene
        .add_volume(
            scene.root(),
            "slab",
            BoxShape::new(1.0 * MM, 1.0 * MM, 100.0 * MM),
            water.clone(),
            VolumeKind::Plain,
        )
        .unwrap();
    scene.translate(slab, Vec3::new(0.0, 0.0, 50.0)).unwrap();

    let n = 1_000_000;
    let mut manager = PropagationManager::new(&attenuation, Pcg64::seed_from_u64(1001));
    let beam = collimated_beam(n, Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
    let survivors = count_survivors(&mut manager, &scene, beam, 200.0 * MM - 1.0);

    let mu = attenuation
        .lac(&water, ProcessKind::Photoelectric, BEAM_ENERGY)
        .unwrap()
        + attenuation
            .lac(&water, ProcessKind::Incoherent, BEAM_ENERGY)
            .unwrap()
        + attenuation
            .lac(&water, ProcessKind::Coherent, BEAM_ENERGY)
            .unwrap();
    let expected = (-mu * 100.0 * MM).exp();
    let observed = survivors as f64 / n as f64;
    let sigma = (expected * (1.0 - expected) / n as f64).sqrt();
    assert!(
        (observed - expected).abs() < 4.0 * sigma,
        "survival {observed} vs {expected} (sigma {sigma})"
    );
}

/// With only the photoelectric process enabled, the total deposited energy is
/// the absorbed fraction times the beam energy.
#[test]
fn photoelectric_only_dose_balances() {
    let mut materials = MaterialDatabase::empty();
    let water = materials
        .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
        .unwrap();
    let elements = element_table(0.05, 0.0, 0.0);
    let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements).unwrap());

    let mut scene = Scene::new(
        BoxShape::new(40.0 * CM, 40.0 * CM, 40.0 * CM),
        materials.vacuum(),
        materials.vacuum(),
        "world",
    );
    let slab = scene
        .add_volume(
            scene.root(),
            "slab",
            BoxShape::new(1.0 * MM, 1.0 * MM, 100.0 * MM),
            water.clone(),
            VolumeKind::Plain,
        )
        .unwrap();
    scene.translate(slab, Vec3::new(0.0, 0.0, 50.0)).unwrap();

    let processes: Vec<Box<dyn Process>> =
        vec![Box::new(Photoelectric::new(attenuation.clone()))];
    let mut manager =
        PropagationManager::with_processes(processes, Pcg64::seed_from_u64(1002));

    let n = 300_000;
    let mut particles = collimated_beam(n, Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
    let mut deposited = 0.0;
    for _ in 0..10_000 {
        if particles.is_empty() {
            break;
        }
        let records = manager.step(&mut particles, &scene).unwrap();
        deposited += records.energy_deposit.iter().sum::<f64>();
        let keep: Vec<bool> = (0..particles.len())
            .map(|i| particles.energy[i] > 1.0 * KEV && particles.position[i].z < 190.0)
            .collect();
        particles.retain_rows(&keep);
    }

    let mu = attenuation
        .lac(&water, ProcessKind::Photoelectric, BEAM_ENERGY)
        .unwrap();
    let expected = n as f64 * BEAM_ENERGY * (1.0 - (-mu * 100.0 * MM).exp());
    assert!(
        (deposited - expected).abs() / expected < 0.01,
        "deposited {deposited} vs {expected}"
    );
}

/// A point source in vacuum with a detector-sized box downstream: nothing to
/// interact in, so the core emits no records at all.
#[test]
fn isotropic_source_in_vacuum_emits_no_records() {
    let mut materials = MaterialDatabase::empty();
    let nai = materials
        .insert(
            "Sodium Iodide",
            MaterialKind::Compound,
            &MaterialEntry {
                density: 3.667,
                z: None,
                composition: Some(
                    [("H".to_string(), 1.0)] // composition irrelevant in vacuum-only transport
                        .into_iter()
                        .collect(),
                ),
                z_to_a_ratio: None,
            },
        )
        .unwrap();
    let elements = element_table(0.0, 0.0, 0.0);
    let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements).unwrap());

    let mut scene = Scene::new(
        BoxShape::new(120.0 * CM, 120.0 * CM, 120.0 * CM),
        materials.vacuum(),
        materials.vacuum(),
        "world",
    );
    let detector = scene
        .add_volume(
            scene.root(),
            "detector",
            BoxShape::new(54.0 * CM, 0.95 * CM, 40.0 * CM),
            nai,
            VolumeKind::Plain,
        )
        .unwrap();
    scene
        .translate(detector, Vec3::new(0.0, 233.0 * MM, 0.0))
        .unwrap();

    let source = Source::point(
        Vec3::ZERO,
        300.0 * MBQ,
        Isotope::tc99m(),
        Pcg64::seed_from_u64(1003),
    )
    .unwrap();
    let propagation = PropagationManager::new(&attenuation, Pcg64::seed_from_u64(1004));
    let manager = SimulationManager::new(
        "vacuum run",
        source,
        Arc::new(scene),
        propagation,
        0.0,
        10_000,
    );
    let (sender, receiver) = sync_channel(1);
    let worker = std::thread::spawn(move || manager.run(&sender));
    let mut sink = NullSink::default();
    drain_into(&receiver, &mut sink).unwrap();
    worker.join().unwrap();
    assert_eq!(sink.records(), 0);
}

/// Woodcock tracking in a layered water/air voxel grid: the fictitious
/// fraction equals 1 − ⟨μ(x)/μ_majorant⟩.
#[test]
fn woodcock_fictitious_rate_matches_the_mixture() {
    let mut materials = MaterialDatabase::empty();
    let water = materials
        .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
        .unwrap();
    let air = materials
        .insert("Air, Dry (near sea level)", MaterialKind::Mixture, &air_entry())
        .unwrap();
    let elements = element_table(0.0042, 0.1398, 0.0065);
    let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements).unwrap());

    // every third z-layer is water so the mixture is 1/3 water everywhere
    let mut ids = Array3::<u8>::zeros((100, 100, 100));
    for ((_, _, k), v) in ids.indexed_iter_mut() {
        if k % 3 == 0 {
            *v = 1;
        }
    }
    let mapping: FxHashMap<u8, Material> =
        [(0u8, air.clone()), (1u8, water.clone())].into_iter().collect();
    let grid = VoxelGrid::from_ids(&ids, 4.0 * MM, &mapping, materials.vacuum()).unwrap();
    assert_eq!(grid.majorant(), water);

    let mut scene = Scene::new(
        BoxShape::new(50.0 * CM, 50.0 * CM, 50.0 * CM),
        materials.vacuum(),
        materials.vacuum(),
        "world",
    );
    scene
        .add_volume(
            scene.root(),
            "phantom",
            BoxShape::new(400.0 * MM, 400.0 * MM, 400.0 * MM),
            materials.vacuum(),
            VolumeKind::Voxel(grid),
        )
        .unwrap();

    let water_fraction =
        ids.iter().filter(|&&v| v == 1).count() as f64 / ids.len() as f64;

    let mut manager = PropagationManager::new(&attenuation, Pcg64::seed_from_u64(1005));
    let n = 50_000;
    let mut particles = collimated_beam(n, Vec3::new(0.0, 0.0, -210.0), Vec3::new(0.0, 0.0, 1.0));
    for _ in 0..2_000 {
        if particles.is_empty() {
            break;
        }
        manager.step(&mut particles, &scene).unwrap();
        let keep: Vec<bool> = (0..particles.len())
            .map(|i| {
                particles.energy[i] > 1.0 * KEV
                    && particles.position[i].x.abs() < 249.0
                    && particles.position[i].y.abs() < 249.0
                    && particles.position[i].z.abs() < 249.0
            })
            .collect();
        particles.retain_rows(&keep);
    }

    let mu_water: f64 = ProcessKind::ALL
        .iter()
        .map(|&p| attenuation.lac(&water, p, BEAM_ENERGY).unwrap())
        .sum();
    let mu_air: f64 = ProcessKind::ALL
        .iter()
        .map(|&p| attenuation.lac(&air, p, BEAM_ENERGY).unwrap())
        .sum();
    let expected =
        1.0 - (water_fraction * mu_water + (1.0 - water_fraction) * mu_air) / mu_water;
    let observed = manager.fictitious() as f64 / manager.candidates() as f64;
    assert!(manager.candidates() > 100_000);
    assert!(
        (observed - expected).abs() < 0.01,
        "fictitious {observed} vs {expected}"
    );
}

/// Emission times follow the decay curve: a KS test against the decay law
/// truncated to the interval the batches spanned.
#[test]
fn emission_times_are_decay_distributed() {
    let half_life = 6.0 * 3600.0e9; // 6 h in ns
    let isotope = Isotope::new(
        "test emitter",
        vec![specmc::source::EnergyLine {
            energy: BEAM_ENERGY,
            probability: 1.0,
        }],
        half_life,
    )
    .unwrap();
    let total: usize = 1_000_000;
    let mut source = Source::point(
        Vec3::ZERO,
        300.0 * MBQ,
        isotope,
        Pcg64::seed_from_u64(1006),
    )
    .unwrap();

    let mut times = Vec::with_capacity(total);
    for _ in 0..100 {
        let batch = source.emit(total / 100);
        times.extend_from_slice(&batch.emission_time);
    }
    let span = source.timer();
    times.sort_by(f64::total_cmp);
    assert!(times[0] >= 0.0 && *times.last().unwrap() <= span + 1.0);

    // KS statistic against the decay CDF truncated to [0, span]
    let denominator = 1.0 - (-span / half_life).exp2();
    let mut d_max: f64 = 0.0;
    let n = times.len() as f64;
    for (i, &t) in times.iter().enumerate() {
        let cdf = (1.0 - (-t / half_life).exp2()) / denominator;
        let lo = i as f64 / n;
        let hi = (i + 1) as f64 / n;
        d_max = d_max.max((cdf - lo).abs()).max((hi - cdf).abs());
    }
    // critical value at p = 0.01
    let d_crit = 1.628 / n.sqrt();
    assert!(d_max < d_crit, "KS D = {d_max}, critical {d_crit}");
}

/// A voxel grid filled with a single material attenuates like the
/// homogeneous box it degenerates to.
#[test]
fn uniform_voxel_grid_behaves_homogeneously() {
    let mut materials = MaterialDatabase::empty();
    let water = materials
        .insert("Water, Liquid", MaterialKind::Compound, &water_entry())
        .unwrap();
    let elements = element_table(0.0042, 0.1398, 0.0065);
    let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements).unwrap());

    let ids = Array3::<u8>::zeros((25, 25, 25));
    let mapping: FxHashMap<u8, Material> = [(0u8, water.clone())].into_iter().collect();
    let grid = VoxelGrid::from_ids(&ids, 4.0 * MM, &mapping, materials.vacuum()).unwrap();

    let mut scene = Scene::new(
        BoxShape::new(40.0 * CM, 40.0 * CM, 40.0 * CM),
        materials.vacuum(),
        materials.vacuum(),
        "world",
    );
    scene
        .add_volume(
            scene.root(),
            "phantom",
            BoxShape::new(100.0, 100.0, 100.0),
            materials.vacuum(),
            VolumeKind::Voxel(grid),
        )
        .unwrap();

    let n = 200_000;
    let mut manager = PropagationManager::new(&attenuation, Pcg64::seed_from_u64(1007));
    let beam = collimated_beam(n, Vec3::new(0.0, 0.0, -51.0), Vec3::new(0.0, 0.0, 1.0));
    let survivors = count_survivors(&mut manager, &scene, beam, 200.0 * MM - 1.0);

    let mu: f64 = ProcessKind::ALL
        .iter()
        .map(|&p| attenuation.lac(&water, p, BEAM_ENERGY).unwrap())
        .sum();
    let expected = (-mu * 100.0).exp();
    let observed = survivors as f64 / n as f64;
    let sigma = (expected * (1.0 - expected) / n as f64).sqrt();
    assert!(
        (observed - expected).abs() < 4.0 * sigma,
        "voxel survival {observed} vs homogeneous {expected}"
    );
}

/// Parallel-hole collimator acceptance: at normal incidence the transmission
/// is the open-hole fraction; a 5° tilt cuts it by far more than 20×.
#[test]
fn collimator_acceptance_collapses_off_axis() {
    let mut materials = MaterialDatabase::empty();
    let lead = materials
        .insert("Pb", MaterialKind::Element, &lead_entry())
        .unwrap();
    // strongly absorbing septa at the beam energy
    let elements = element_table(2.39, 0.12, 0.65);
    let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements).unwrap());

    let hole_diameter = 1.5 * MM;
    let septa = 0.2 * MM;
    let thickness = 35.0 * MM;

    let mut scene = Scene::new(
        BoxShape::new(20.0 * CM, 20.0 * CM, 20.0 * CM),
        materials.vacuum(),
        materials.vacuum(),
        "world",
    );
    let lattice = ParallelCollimator::new(hole_diameter, septa, materials.vacuum()).unwrap();
    scene
        .add_volume(
            scene.root(),
            "collimator",
            BoxShape::new(100.0 * MM, 100.0 * MM, thickness),
            lead,
            VolumeKind::Parametric(Arc::new(lattice)),
        )
        .unwrap();

    let transmission = |angle: f64, seed: u64| {
        let n = 20_000;
        let mut rng = Pcg64::seed_from_u64(seed);
        let direction = Vec3::new(angle.sin(), 0.0, angle.cos());
        let mut positions = Vec::with_capacity(n);
        for _ in 0..n {
            positions.push(Vec3::new(
                (rng.gen::<f64>() - 0.5) * 40.0,
                (rng.gen::<f64>() - 0.5) * 40.0,
                -30.0,
            ));
        }
        let batch = ParticleBatch::emitted(
            PHOTON,
            positions,
            vec![direction; n],
            vec![BEAM_ENERGY; n],
            vec![0.0; n],
        );
        let mut manager = PropagationManager::new(&attenuation, Pcg64::seed_from_u64(seed + 1));
        count_survivors(&mut manager, &scene, batch, 100.0 * MM - 1.0) as f64 / n as f64
    };

    let open_fraction = (hole_diameter / (hole_diameter + septa)).powi(2);
    let at_normal = transmission(0.0, 2001);
    assert!(
        (at_normal - open_fraction).abs() < 0.1 * open_fraction,
        "normal transmission {at_normal} vs open fraction {open_fraction}"
    );
    let at_five_degrees = transmission(5.0_f64.to_radians(), 2003);
    assert!(
        at_five_degrees * 20.0 < at_normal,
        "tilted transmission {at_five_degrees} vs normal {at_normal}"
    );
}
