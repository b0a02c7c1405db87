//! Structure-of-arrays photon batches.

use crate::math::Vec3;
use std::sync::atomic::{AtomicU64, Ordering};

/// Particle kind id for gamma photons, the only kind transported.
pub const PHOTON: u8 = 0;

/// Unit-norm tolerance for directions.
pub const DIRECTION_TOLERANCE: f64 = 1e-6;

/// Process-wide monotone particle-id counter.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn claim_ids(n: usize) -> u64 {
    NEXT_ID.fetch_add(n as u64, Ordering::Relaxed)
}

/// A columnar batch of photons. All positional fields are in the world frame
/// of the simulation volume; directions are unit vectors; energies are MeV
/// and non-negative.
#[derive(Clone, Debug, Default)]
pub struct ParticleBatch {
    /// Particle kind ids.
    pub kind: Vec<u8>,
    /// Current positions, mm.
    pub position: Vec<Vec3>,
    /// Current unit directions.
    pub direction: Vec<Vec3>,
    /// Current energies, MeV.
    pub energy: Vec<f64>,
    /// Emission times, ns.
    pub emission_time: Vec<f64>,
    /// Energies at emission, MeV.
    pub emission_energy: Vec<f64>,
    /// Positions at emission, mm.
    pub emission_position: Vec<Vec3>,
    /// Directions at emission.
    pub emission_direction: Vec<Vec3>,
    /// Total path length travelled, mm.
    pub distance_traveled: Vec<f64>,
    /// Process-wide unique monotone ids.
    pub id: Vec<u64>,
}

impl ParticleBatch {
    /// Builds a freshly-emitted batch: the emission fields mirror the current
    /// state, travelled distance is zero and ids come from the process-wide
    /// counter.
    #[must_use]
    pub fn emitted(
        kind: u8,
        position: Vec<Vec3>,
        direction: Vec<Vec3>,
        energy: Vec<f64>,
        emission_time: Vec<f64>,
    ) -> Self {
        let n = energy.len();
        assert_eq!(position.len(), n);
        assert_eq!(direction.len(), n);
        assert_eq!(emission_time.len(), n);
        let first_id = claim_ids(n);
        Self {
            kind: vec![kind; n],
            emission_energy: energy.clone(),
            emission_position: position.clone(),
            emission_direction: direction.clone(),
            distance_traveled: vec![0.0; n],
            id: (first_id..first_id + n as u64).collect(),
            position,
            direction,
            energy,
            emission_time,
        }
    }

    /// Number of photons in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.energy.len()
    }

    /// Returns `true` for a drained batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    /// Moves each photon along its direction by the per-row distance and
    /// accumulates the travelled path.
    pub fn advance(&mut self, distance: &[f64]) {
        assert_eq!(distance.len(), self.len());
        for i in 0..self.len() {
            self.position[i] += self.direction[i] * distance[i];
            self.distance_traveled[i] += distance[i];
        }
    }

    /// Deflects the direction of the listed rows by polar angle θ and
    /// azimuth φ around the incoming direction, using the pole-stable
    /// `cosθ − b/(1+|z|)` transport form. Rows whose direction drifts off
    /// unit norm by more than ten times the tolerance are flagged in the
    /// returned list; callers drop them.
    pub fn rotate_rows(&mut self, rows: &[usize], theta: &[f64], phi: &[f64]) -> Vec<usize> {
        assert_eq!(rows.len(), theta.len());
        assert_eq!(rows.len(), phi.len());
        let mut degraded = Vec::new();
        for (k, &i) in rows.iter().enumerate() {
            let d = self.direction[i];
            let (sin_theta, cos_theta) = theta[k].sin_cos();
            let delta1 = sin_theta * phi[k].cos();
            let delta2 = sin_theta * phi[k].sin();
            let delta = if d.z < 0.0 { -1.0 } else { 1.0 };
            let b = d.x * delta1 + d.y * delta2;
            let tmp = cos_theta - b / (1.0 + d.z.abs());
            let rotated = Vec3::new(
                d.x * tmp + delta1,
                d.y * tmp + delta2,
                d.z * cos_theta - delta * b,
            );
            self.direction[i] = rotated;
            if (rotated.norm() - 1.0).abs() > 10.0 * DIRECTION_TOLERANCE {
                degraded.push(i);
            }
        }
        degraded
    }

    /// Subtracts the per-row energy deposit for the listed rows, clamping at
    /// zero.
    pub fn deposit_rows(&mut self, rows: &[usize], deposit: &[f64]) {
        assert_eq!(rows.len(), deposit.len());
        for (k, &i) in rows.iter().enumerate() {
            self.energy[i] = (self.energy[i] - deposit[k]).max(0.0);
        }
    }

    /// Keeps only the rows whose `keep` entry is `true`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.len());
        let mut it = keep.iter();
        self.kind.retain(|_| *it.next().unwrap_or_else(|| unreachable!()));
        macro_rules! retain_column {
            ($column:ident) => {
                let mut it = keep.iter();
                self.$column
                    .retain(|_| *it.next().unwrap_or_else(|| unreachable!()));
            };
        }
        retain_column!(position);
        retain_column!(direction);
        retain_column!(energy);
        retain_column!(emission_time);
        retain_column!(emission_energy);
        retain_column!(emission_position);
        retain_column!(emission_direction);
        retain_column!(distance_traveled);
        retain_column!(id);
    }

    /// Overwrites the rows whose `mask` entry is `true` with the rows of
    /// `refill`, in order. The batch is re-used in place across steps.
    ///
    /// # Panics
    ///
    /// Panics if `refill` does not hold exactly as many rows as `mask`
    /// selects.
    pub fn overwrite_rows(&mut self, mask: &[bool], refill: &Self) {
        assert_eq!(mask.len(), self.len());
        let mut src = 0;
        for (i, &m) in mask.iter().enumerate() {
            if !m {
                continue;
            }
            self.kind[i] = refill.kind[src];
            self.position[i] = refill.position[src];
            self.direction[i] = refill.direction[src];
            self.energy[i] = refill.energy[src];
            self.emission_time[i] = refill.emission_time[src];
            self.emission_energy[i] = refill.emission_energy[src];
            self.emission_position[i] = refill.emission_position[src];
            self.emission_direction[i] = refill.emission_direction[src];
            self.distance_traveled[i] = refill.distance_traveled[src];
            self.id[i] = refill.id[src];
            src += 1;
        }
        assert_eq!(src, refill.len());
    }
}
