//! Interaction records and the sink boundary.

use crate::attenuation::ProcessKind;
use crate::error::{Error, Result};
use crate::material::MaterialBatch;
use crate::math::Vec3;
use crate::particle::ParticleBatch;

/// A columnar batch of interaction records, one row per photon that actually
/// interacted during a step. Positions and directions are in the world frame;
/// a sink derives local-frame columns for its sensitive volumes.
#[derive(Clone, Debug, Default)]
pub struct InteractionBatch {
    /// Interaction positions, mm.
    pub position: Vec<Vec3>,
    /// Post-scatter directions.
    pub direction: Vec<Vec3>,
    /// The process that produced each record.
    pub process: Vec<ProcessKind>,
    /// Particle kind ids.
    pub particle_kind: Vec<u8>,
    /// Particle ids.
    pub particle_id: Vec<u64>,
    /// Energy deposited at the interaction, MeV.
    pub energy_deposit: Vec<f64>,
    /// Density of the material at the interaction point, g/mm³.
    pub material_density: Vec<f64>,
    /// Polar scattering angle θ, radians.
    pub scattering_theta: Vec<f64>,
    /// Azimuthal scattering angle φ, radians.
    pub scattering_phi: Vec<f64>,
    /// Emission times, ns.
    pub emission_time: Vec<f64>,
    /// Energies at emission, MeV.
    pub emission_energy: Vec<f64>,
    /// Positions at emission, mm.
    pub emission_position: Vec<Vec3>,
    /// Directions at emission.
    pub emission_direction: Vec<Vec3>,
    /// Path length travelled up to the interaction, mm.
    pub distance_traveled: Vec<f64>,
}

impl InteractionBatch {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.particle_id.len()
    }

    /// Returns `true` if no interactions were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particle_id.is_empty()
    }

    /// Seeds one record per listed particle row with the particle's current
    /// state and the material density at the point. Deposits and scattering
    /// angles start at zero; the caller fills in the process outcome.
    #[must_use]
    pub fn from_particles(
        process: ProcessKind,
        particles: &ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
    ) -> Self {
        let n = rows.len();
        let mut batch = Self {
            position: Vec::with_capacity(n),
            direction: Vec::with_capacity(n),
            process: vec![process; n],
            particle_kind: Vec::with_capacity(n),
            particle_id: Vec::with_capacity(n),
            energy_deposit: vec![0.0; n],
            material_density: Vec::with_capacity(n),
            scattering_theta: vec![0.0; n],
            scattering_phi: vec![0.0; n],
            emission_time: Vec::with_capacity(n),
            emission_energy: Vec::with_capacity(n),
            emission_position: Vec::with_capacity(n),
            emission_direction: Vec::with_capacity(n),
            distance_traveled: Vec::with_capacity(n),
        };
        for &i in rows {
            batch.position.push(particles.position[i]);
            batch.direction.push(particles.direction[i]);
            batch.particle_kind.push(particles.kind[i]);
            batch.particle_id.push(particles.id[i]);
            batch.material_density.push(materials.get(i).density());
            batch.emission_time.push(particles.emission_time[i]);
            batch.emission_energy.push(particles.emission_energy[i]);
            batch.emission_position.push(particles.emission_position[i]);
            batch
                .emission_direction
                .push(particles.emission_direction[i]);
            batch.distance_traveled.push(particles.distance_traveled[i]);
        }
        batch
    }

    /// Appends all rows of `other`.
    pub fn append(&mut self, other: &mut Self) {
        self.position.append(&mut other.position);
        self.direction.append(&mut other.direction);
        self.process.append(&mut other.process);
        self.particle_kind.append(&mut other.particle_kind);
        self.particle_id.append(&mut other.particle_id);
        self.energy_deposit.append(&mut other.energy_deposit);
        self.material_density.append(&mut other.material_density);
        self.scattering_theta.append(&mut other.scattering_theta);
        self.scattering_phi.append(&mut other.scattering_phi);
        self.emission_time.append(&mut other.emission_time);
        self.emission_energy.append(&mut other.emission_energy);
        self.emission_position.append(&mut other.emission_position);
        self.emission_direction.append(&mut other.emission_direction);
        self.distance_traveled.append(&mut other.distance_traveled);
    }
}

/// The contract a downstream recorder implements. The core neither opens
/// files nor imposes a buffering policy; it only hands over record batches in
/// the order the photons interacted.
pub trait Sink: Send {
    /// Accepts one step's records.
    ///
    /// # Errors
    ///
    /// Implementations surface their I/O failures as [`Error::Sink`]; the
    /// owning simulation manager logs and terminates.
    fn record_batch(&mut self, records: &InteractionBatch) -> Result<()>;

    /// Signals that the producing worker has drained all photons; the sink
    /// flushes whatever it buffered.
    ///
    /// # Errors
    ///
    /// Implementations surface their I/O failures as [`Error::Sink`].
    fn end_of_stream(&mut self) -> Result<()>;
}

/// What a worker sends over its record channel. Workers never swallow errors:
/// a failure is forwarded as a terminal message distinct from the normal end
/// of stream.
pub enum WorkerMessage {
    /// One step's interaction records.
    Records(InteractionBatch),
    /// The worker drained all photons and exited cleanly.
    Finished,
    /// The worker terminated on an error.
    Failed(Error),
}

/// A sink that counts records and otherwise discards them. Useful for tests
/// and dry runs.
#[derive(Debug, Default)]
pub struct NullSink {
    records: usize,
    closed: bool,
}

impl NullSink {
    /// Records accepted so far.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Whether the stream has ended.
    #[must_use]
    pub const fn closed(&self) -> bool {
        self.closed
    }
}

impl Sink for NullSink {
    fn record_batch(&mut self, records: &InteractionBatch) -> Result<()> {
        self.records += records.len();
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
