//! The per-worker simulation loop.

use crate::error::{Error, Result};
use crate::particle::ParticleBatch;
use crate::propagation::PropagationManager;
use crate::record::{Sink, WorkerMessage};
use crate::source::Source;
use crate::units::{KEV, MEV, S};
use crate::volume::Scene;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

/// A photon-validity predicate evaluated against the whole batch.
pub type ValidityFilter = Box<dyn Fn(&ParticleBatch) -> Vec<bool> + Send>;

/// Owns one source, one scene and one propagator and drives them step by
/// step on its worker thread, streaming interaction records through a
/// bounded channel. Many managers run concurrently over independent view
/// angles and time slices, each with its own split-off generator and scene.
pub struct SimulationManager {
    name: String,
    source: Source,
    scene: Arc<Scene>,
    propagation: PropagationManager,
    /// Source-timer value after which invalid photons are no longer
    /// replaced, ns.
    stop_time: f64,
    particles_per_batch: usize,
    min_energy: f64,
    max_energy: f64,
    filters: Vec<ValidityFilter>,
    interrupt: Arc<AtomicBool>,
    step: u64,
}

impl SimulationManager {
    /// Creates a manager. The default validity filters require the photon
    /// energy to sit inside the process window and the position inside the
    /// root volume.
    #[must_use]
    pub fn new(
        name: &str,
        source: Source,
        scene: Arc<Scene>,
        propagation: PropagationManager,
        stop_time: f64,
        particles_per_batch: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            scene,
            propagation,
            stop_time,
            particles_per_batch,
            min_energy: 1.0 * KEV,
            max_energy: 1.0 * MEV,
            filters: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            step: 0,
        }
    }

    /// The flag a supervisor raises to request cooperative cancellation:
    /// refilling stops and the remaining live photons die naturally.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Adds a validity filter on top of the defaults.
    pub fn add_filter(&mut self, filter: ValidityFilter) {
        self.filters.push(filter);
    }

    /// Overrides the accepted energy window.
    pub fn set_energy_window(&mut self, min: f64, max: f64) {
        self.min_energy = min;
        self.max_energy = max;
    }

    /// Steps completed so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.step
    }

    fn check_valid(&self, particles: &ParticleBatch) -> Vec<bool> {
        let mut valid: Vec<bool> = particles
            .energy
            .iter()
            .zip(&particles.position)
            .map(|(&energy, &position)| {
                energy > self.min_energy
                    && energy < self.max_energy
                    && self.scene.contains(self.scene.root(), position)
            })
            .collect();
        for filter in &self.filters {
            for (v, f) in valid.iter_mut().zip(filter(particles)) {
                *v &= f;
            }
        }
        valid
    }

    /// Runs the worker protocol to completion, consuming the manager. The
    /// only blocking point is the bounded channel send, which provides
    /// back-pressure from a slow sink. On an internal error the worker
    /// forwards it as a terminal [`WorkerMessage::Failed`] and exits; it
    /// never swallows the error.
    pub fn run(mut self, sender: &SyncSender<WorkerMessage>) {
        log::warn!(
            "{} started at source timer {:.3} s, stop time {:.3} s",
            self.name,
            self.source.timer() / S,
            self.stop_time / S,
        );
        let mut particles = self.source.emit(self.particles_per_batch);
        while !particles.is_empty() {
            let records = match self.propagation.step(&mut particles, &self.scene) {
                Ok(records) => records,
                Err(err) => {
                    log::error!("{} terminated: {err}", self.name);
                    let _ = sender.send(WorkerMessage::Failed(err));
                    return;
                }
            };
            let valid = self.check_valid(&particles);
            let stop_time = if self.interrupt.load(Ordering::Relaxed) {
                0.0
            } else {
                self.stop_time
            };
            if self.source.timer() <= stop_time {
                let invalid: Vec<bool> = valid.iter().map(|&v| !v).collect();
                let refill_count = invalid.iter().filter(|&&m| m).count();
                let refill = self.source.emit(refill_count);
                particles.overwrite_rows(&invalid, &refill);
            } else {
                particles.retain_rows(&valid);
            }
            self.step += 1;
            if !records.is_empty() {
                log::debug!(
                    "{} generated {} events at step {}",
                    self.name,
                    records.len(),
                    self.step
                );
                if sender.send(WorkerMessage::Records(records)).is_err() {
                    log::error!("{}: record channel closed, aborting", self.name);
                    return;
                }
            }
        }
        let _ = sender.send(WorkerMessage::Finished);
        log::warn!(
            "{} finished after {} steps at source timer {:.3} s",
            self.name,
            self.step,
            self.source.timer() / S,
        );
    }
}

/// Drains one worker's channel into a sink. Returns when the worker signals
/// the end of its stream; a forwarded worker error is surfaced after the
/// sink is flushed.
///
/// # Errors
///
/// Propagates sink failures and forwarded worker errors.
pub fn drain_into(receiver: &Receiver<WorkerMessage>, sink: &mut dyn Sink) -> Result<()> {
    loop {
        match receiver.recv() {
            Ok(WorkerMessage::Records(records)) => sink.record_batch(&records)?,
            Ok(WorkerMessage::Finished) => {
                sink.end_of_stream()?;
                return Ok(());
            }
            Ok(WorkerMessage::Failed(err)) => {
                sink.end_of_stream().ok();
                return Err(err);
            }
            Err(_) => {
                return Err(Error::Sink(
                    "worker channel closed without end-of-stream".into(),
                ))
            }
        }
    }
}
