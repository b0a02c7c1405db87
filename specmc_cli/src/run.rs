use super::helpers::{build_scene, RunConfig};
use super::sink::NpzSink;
use super::{GlobalConfiguration, Subcommand};
use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use ndarray::Array3;
use rand_pcg::Pcg64;
use specmc::attenuation::{load_element_table, AttenuationDatabase};
use specmc::material::MaterialDatabase;
use specmc::phantom::{load_activity, load_material_ids};
use specmc::propagation::PropagationManager;
use specmc::rng::SeedSplitter;
use specmc::simulation::{drain_into, SimulationManager};
use specmc::source::{Isotope, Source};
use specmc::units::{MBQ, S};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};

/// Runs a simulation described by a configuration file.
#[derive(Parser)]
pub struct Opts {
    /// Path of the run configuration.
    #[arg(value_hint = ValueHint::FilePath)]
    config: PathBuf,
}

struct SharedInputs {
    config: RunConfig,
    materials: MaterialDatabase,
    attenuation: Arc<AttenuationDatabase>,
    phantom_ids: Array3<u8>,
    activity: Array3<f32>,
    isotope: Isotope,
}

struct Task {
    /// Index of the view this task renders.
    view: usize,
    /// Starting angle of the first head, radians.
    angle: f64,
    /// Simulated interval, internal time units.
    interval: (f64, f64),
    slice: usize,
    source_rng: Pcg64,
    transport_rng: Pcg64,
    lock: Arc<Mutex<()>>,
}

fn run_task(task: Task, inputs: &SharedInputs) -> Result<()> {
    let config = &inputs.config;
    let built = build_scene(config, &inputs.materials, &inputs.phantom_ids, task.angle)?;
    let scene = Arc::new(built.scene);
    let detectors: Vec<_> = built.detectors.iter().map(|head| head.detector).collect();

    let mut source = Source::new(
        &inputs.activity,
        config.phantom_voxel_size,
        config.activity * MBQ,
        inputs.isotope.clone(),
        task.source_rng,
    )?;
    source.set_state(Some(task.interval.0), None);

    let propagation = PropagationManager::new(&inputs.attenuation, task.transport_rng);
    let name = format!(
        "view {:.1} deg, slice {}",
        task.angle.to_degrees(),
        task.slice
    );
    let manager = SimulationManager::new(
        &name,
        source,
        scene.clone(),
        propagation,
        task.interval.1,
        config.particles_per_batch,
    );

    let directory = config
        .output_dir
        .join(format!("view_{:.1}_deg", task.angle.to_degrees()))
        .join(format!("slice_{}", task.slice));
    let mut sink = NpzSink::new(
        scene,
        detectors,
        directory,
        config.sink_buffer,
        task.lock,
    )?;

    let (sender, receiver) = sync_channel(1);
    std::thread::scope(|scope| {
        scope.spawn(move || manager.run(&sender));
        drain_into(&receiver, &mut sink)
    })?;
    Ok(())
}

impl Subcommand for Opts {
    fn run(&self, _: &GlobalConfiguration) -> Result<ExitCode> {
        let config = RunConfig::load(&self.config)?;

        let materials = MaterialDatabase::load(&config.materials_table)?;
        let elements = load_element_table(&config.attenuation_table)?;
        let attenuation = Arc::new(AttenuationDatabase::build(&materials, &elements)?);
        let phantom_ids = load_material_ids(&config.attenuation_phantom)?;
        let activity = load_activity(&config.activity_phantom)?;
        let isotope = Isotope::preset(&config.isotope)?;

        let mut splitter = SeedSplitter::new(config.seed);
        let angles = config.task_angles();
        let locks: Vec<Arc<Mutex<()>>> =
            angles.iter().map(|_| Arc::new(Mutex::new(()))).collect();
        let mut tasks = Vec::new();
        for (slice, interval) in config.time_intervals().into_iter().enumerate() {
            for (view, &angle) in angles.iter().enumerate() {
                tasks.push(Task {
                    view,
                    angle,
                    interval: (interval.0 * S, interval.1 * S),
                    slice,
                    source_rng: splitter.split(),
                    transport_rng: splitter.split(),
                    lock: locks[view].clone(),
                });
            }
        }
        log::info!(
            "running {} tasks ({} views × {} time slices) on {} workers",
            tasks.len(),
            angles.len(),
            config.time_slices,
            config.pool_size,
        );

        let inputs = SharedInputs {
            config,
            materials,
            attenuation,
            phantom_ids,
            activity,
            isotope,
        };

        let mut failures = 0usize;
        let mut tasks = tasks.into_iter().peekable();
        while tasks.peek().is_some() {
            let wave: Vec<Task> = tasks.by_ref().take(inputs.config.pool_size).collect();
            let results: Vec<(usize, Result<()>)> = std::thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .into_iter()
                    .map(|task| {
                        let view = task.view;
                        let inputs = &inputs;
                        (view, scope.spawn(move || run_task(task, inputs)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(view, handle)| {
                        (
                            view,
                            handle
                                .join()
                                .map_err(|_| anyhow::anyhow!("worker panicked"))
                                .and_then(|result| result),
                        )
                    })
                    .collect()
            });
            for (view, result) in results {
                if let Err(err) = result.with_context(|| format!("view {view} failed")) {
                    // one failed worker does not stop the others
                    log::error!("{err:#}");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            log::error!("{failures} of the submitted tasks failed");
            return Ok(ExitCode::FAILURE);
        }
        Ok(ExitCode::SUCCESS)
    }
}
