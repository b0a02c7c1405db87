//! The delta-tracking propagation step.

use crate::attenuation::AttenuationDatabase;
use crate::error::Result;
use crate::material::MaterialBatch;
use crate::math::Vec3;
use crate::particle::ParticleBatch;
use crate::process::{Compton, Coherent, Photoelectric, Process};
use crate::record::InteractionBatch;
use crate::rng::exponential;
use crate::volume::Scene;
use rand::Rng;
use rand_pcg::Pcg64;
use std::sync::Arc;

/// Advances a particle batch by one Monte Carlo step per call: cast to the
/// next boundary, sample candidate free paths against the current (majorant)
/// material, resolve Woodcock candidates against the real material, classify
/// real vs fictitious and dispatch the chosen process.
pub struct PropagationManager {
    processes: Vec<Box<dyn Process>>,
    rng: Pcg64,
    candidates: u64,
    fictitious: u64,
}

impl PropagationManager {
    /// Creates a manager with the standard process list: photoelectric,
    /// Compton, coherent.
    #[must_use]
    pub fn new(attenuation: &Arc<AttenuationDatabase>, rng: Pcg64) -> Self {
        let processes: Vec<Box<dyn Process>> = vec![
            Box::new(Photoelectric::new(attenuation.clone())),
            Box::new(Compton::new(attenuation.clone())),
            Box::new(Coherent::new(attenuation.clone())),
        ];
        Self::with_processes(processes, rng)
    }

    /// Creates a manager over an explicit process list.
    #[must_use]
    pub fn with_processes(processes: Vec<Box<dyn Process>>, rng: Pcg64) -> Self {
        Self {
            processes,
            rng,
            candidates: 0,
            fictitious: 0,
        }
    }

    /// The enabled processes, in dispatch order.
    #[must_use]
    pub fn processes(&self) -> &[Box<dyn Process>] {
        &self.processes
    }

    /// Candidate interactions seen so far.
    #[must_use]
    pub const fn candidates(&self) -> u64 {
        self.candidates
    }

    /// Candidate interactions classified fictitious so far. Only Woodcock
    /// volumes with a majorant above the real coefficient contribute.
    #[must_use]
    pub const fn fictitious(&self) -> u64 {
        self.fictitious
    }

    /// One delta-tracking step over `particles` within `scene`. Photons whose
    /// candidate free path is strictly shorter than the distance to the next
    /// surface interact; all others stream to the boundary and are
    /// re-evaluated from the next volume on the following step.
    ///
    /// # Errors
    ///
    /// Propagates attenuation-table failures; the offending batch is left
    /// moved but un-dispatched.
    pub fn step(
        &mut self,
        particles: &mut ParticleBatch,
        scene: &Scene,
    ) -> Result<InteractionBatch> {
        let n = particles.len();
        if n == 0 {
            return Ok(InteractionBatch::default());
        }

        let (mut distance, volumes) = scene.cast_path(&particles.position, &particles.direction);

        // the current volume's intrinsic material: the majorant for Woodcock
        // volumes, the true one everywhere else
        let mut materials = MaterialBatch::new(n, scene.vacuum());
        for (volume, rows) in volumes.inverse() {
            if let Some(id) = volume {
                materials.set_at(&rows, &scene.intrinsic_material(id));
            }
        }

        let mut lac = vec![vec![0.0; n]; self.processes.len()];
        let mut total = vec![0.0; n];
        for (pi, process) in self.processes.iter().enumerate() {
            let dropped = process.lac_into(particles, &materials, &mut lac[pi])?;
            if dropped > 0 {
                log::debug!("{dropped} photons outside the {} range", process.name());
            }
            for (t, &l) in total.iter_mut().zip(&lac[pi]) {
                *t += l;
            }
        }

        let mut interacted = Vec::new();
        for i in 0..n {
            let free_path = exponential(&mut self.rng, total[i]);
            if free_path < distance[i] {
                distance[i] = free_path;
                interacted.push(i);
            }
        }
        particles.advance(&distance);
        if interacted.is_empty() {
            return Ok(InteractionBatch::default());
        }

        // Woodcock candidates: re-resolve the real material at the candidate
        // point and re-evaluate the numerator coefficients; the denominator
        // stays the majorant total
        let woodcock_mask =
            volumes.mask_matching(|volume| matches!(volume, Some(id) if scene.is_woodcock(*id)));
        let woodcock_rows: Vec<usize> = interacted
            .iter()
            .copied()
            .filter(|&i| woodcock_mask[i])
            .collect();
        if !woodcock_rows.is_empty() {
            let points: Vec<Vec3> = woodcock_rows.iter().map(|&i| particles.position[i]).collect();
            let real = scene.materials_at(&points);
            materials.set_from(&woodcock_rows, &real);
            for (pi, process) in self.processes.iter().enumerate() {
                process.lac_rows(particles, &materials, &woodcock_rows, &mut lac[pi])?;
            }
        }

        let mut dispatch: Vec<Vec<usize>> = vec![Vec::new(); self.processes.len()];
        for &i in &interacted {
            self.candidates += 1;
            let u = self.rng.gen::<f64>();
            let mut lower = 0.0;
            let mut chosen = None;
            for (pi, lac_p) in lac.iter().enumerate() {
                let upper = lower + lac_p[i] / total[i];
                if u >= lower && u <= upper {
                    chosen = Some(pi);
                    break;
                }
                lower = upper;
            }
            match chosen {
                Some(pi) => dispatch[pi].push(i),
                // fictitious: the photon continues unchanged and is simply
                // re-submitted on the next step
                None => self.fictitious += 1,
            }
        }

        let mut records = InteractionBatch::default();
        for (pi, process) in self.processes.iter().enumerate() {
            if dispatch[pi].is_empty() {
                continue;
            }
            let mut produced =
                process.apply(particles, &dispatch[pi], &materials, &mut self.rng)?;
            records.append(&mut produced);
        }
        Ok(records)
    }
}
