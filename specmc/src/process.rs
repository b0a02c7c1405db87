//! Photon interaction processes: photoelectric absorption, coherent
//! (Rayleigh) and incoherent (Compton) scattering.
//!
//! The angle samplers are pure in `(energy, Z, rng)` so independent workers
//! can run them concurrently on their own generators.

use crate::attenuation::{AttenuationDatabase, ProcessKind};
use crate::error::{Error, Result};
use crate::material::MaterialBatch;
use crate::particle::ParticleBatch;
use crate::record::InteractionBatch;
use crate::rng::exponential;
use crate::units::{KEV, MEV};
use rand::Rng;
use rand_pcg::Pcg64;
use std::f64::consts::PI;
use std::sync::Arc;

/// Electron rest energy, MeV.
pub const ELECTRON_REST_ENERGY: f64 = 0.510998910 * MEV;

/// Default tabulated energy window for every process.
pub const DEFAULT_ENERGY_RANGE: (f64, f64) = (1.0 * KEV, 1.0 * MEV);

/// Reduced Thomas–Fermi screening length, mm, divided by Z^(1/3) at use.
const SCREENING_LENGTH: f64 = 0.885 * 0.529_177_21e-7;

/// ħc in MeV·mm.
const HBAR_C: f64 = 197.326_980_4e-12;

/// Capability set shared by all photon interaction processes.
pub trait Process: Send + Sync {
    /// Which tabulated process this is.
    fn kind(&self) -> ProcessKind;

    /// The attenuation tables this process draws its coefficients from.
    fn attenuation(&self) -> &AttenuationDatabase;

    /// Tabulated energy window; photons outside it do not interact via this
    /// process and are dropped by the validity filters.
    fn energy_range(&self) -> (f64, f64);

    /// Process name as written into interaction records.
    fn name(&self) -> &'static str {
        self.kind().process_name()
    }

    /// Per-photon linear attenuation coefficient at the photons' current
    /// energies; out-of-range rows get zero and their count is returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Data`] for a material missing from the
    /// tables.
    fn lac_into(
        &self,
        particles: &ParticleBatch,
        materials: &MaterialBatch,
        out: &mut [f64],
    ) -> Result<usize> {
        self.attenuation().lac_into(
            materials,
            self.kind(),
            self.energy_range(),
            &particles.energy,
            out,
        )
    }

    /// Re-evaluates the coefficient for the listed rows only, after their
    /// material was re-resolved.
    ///
    /// # Errors
    ///
    /// Same as [`Self::lac_into`].
    fn lac_rows(
        &self,
        particles: &ParticleBatch,
        materials: &MaterialBatch,
        rows: &[usize],
        out: &mut [f64],
    ) -> Result<usize> {
        self.attenuation().lac_rows(
            materials,
            self.kind(),
            self.energy_range(),
            &particles.energy,
            rows,
            out,
        )
    }

    /// Samples one candidate free path per photon from `Exp(1/μ)`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::lac_into`].
    fn sample_free_path(
        &self,
        particles: &ParticleBatch,
        materials: &MaterialBatch,
        rng: &mut Pcg64,
        out: &mut [f64],
    ) -> Result<usize> {
        let dropped = self.lac_into(particles, materials, out)?;
        for rate in out.iter_mut() {
            *rate = exponential(rng, *rate);
        }
        Ok(dropped)
    }

    /// Applies the process to the listed rows: updates the particle state in
    /// place and returns one interaction record per row.
    ///
    /// # Errors
    ///
    /// Propagates table lookup failures.
    fn apply(
        &self,
        particles: &mut ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
        rng: &mut Pcg64,
    ) -> Result<InteractionBatch>;
}

fn sample_phi(rng: &mut Pcg64) -> f64 {
    PI * 2.0f64.mul_add(rng.gen::<f64>(), -1.0)
}

/// Recovers locally from an [`Error::Numerical`] direction failure: the
/// error is logged and the photon is left for the next filter pass to drop.
fn drop_degraded(particles: &mut ParticleBatch, degraded: &[usize]) {
    for &row in degraded {
        let err = Error::Numerical(format!(
            "photon {}: non-unit direction after rotation",
            particles.id[row]
        ));
        log::warn!("{err}");
        particles.energy[row] = 0.0;
    }
}

/// Samples the Compton polar angle from the Klein–Nishina cross-section by
/// the standard composition-rejection method.
pub fn sample_klein_nishina(rng: &mut impl Rng, energy: f64) -> f64 {
    let k = energy / ELECTRON_REST_ENERGY;
    let eps0 = 1.0 / 2.0f64.mul_add(k, 1.0);
    let eps0_sq = eps0 * eps0;
    let alpha1 = -eps0.ln();
    let alpha2 = 0.5 * (1.0 - eps0_sq);
    loop {
        let (eps, eps_sq) = if alpha1 >= (alpha1 + alpha2) * rng.gen::<f64>() {
            let eps = eps0.powf(rng.gen::<f64>());
            (eps, eps * eps)
        } else {
            let eps_sq = (1.0 - eps0_sq).mul_add(rng.gen::<f64>(), eps0_sq);
            (eps_sq.sqrt(), eps_sq)
        };
        let one_minus_cos = (1.0 - eps) / (k * eps);
        let sin_sq = one_minus_cos * (2.0 - one_minus_cos);
        let rejection = 1.0 - eps * sin_sq / (1.0 + eps_sq);
        if rng.gen::<f64>() < rejection {
            return (1.0 - one_minus_cos).clamp(-1.0, 1.0).acos();
        }
    }
}

/// Samples the Rayleigh polar angle: Thomson angular factor times the
/// squared screened atomic form factor, normalized per Z. The momentum
/// transfer part is drawn by inverse CDF, the Thomson factor by rejection.
pub fn sample_rayleigh(rng: &mut impl Rng, energy: f64, z: u16) -> f64 {
    let screening = SCREENING_LENGTH / f64::from(z.max(1)).cbrt();
    let u_max = (2.0 * energy * screening / HBAR_C).powi(2);
    loop {
        let cosine = if u_max > 1e-12 {
            let norm = 1.0 - (1.0 + u_max).powi(-3);
            let u = (1.0 - rng.gen::<f64>() * norm).powf(-1.0 / 3.0) - 1.0;
            2.0f64.mul_add(-(u / u_max), 1.0)
        } else {
            2.0f64.mul_add(rng.gen::<f64>(), -1.0)
        };
        if rng.gen::<f64>() < 0.5 * cosine.mul_add(cosine, 1.0) {
            return cosine.clamp(-1.0, 1.0).acos();
        }
    }
}

/// Photoelectric absorption: the photon deposits all of its remaining energy
/// and stops.
pub struct Photoelectric {
    attenuation: Arc<AttenuationDatabase>,
    energy_range: (f64, f64),
}

impl Photoelectric {
    /// Creates the process over the given tables.
    #[must_use]
    pub fn new(attenuation: Arc<AttenuationDatabase>) -> Self {
        Self {
            attenuation,
            energy_range: DEFAULT_ENERGY_RANGE,
        }
    }
}

impl Process for Photoelectric {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Photoelectric
    }

    fn attenuation(&self) -> &AttenuationDatabase {
        &self.attenuation
    }

    fn energy_range(&self) -> (f64, f64) {
        self.energy_range
    }

    fn apply(
        &self,
        particles: &mut ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
        _rng: &mut Pcg64,
    ) -> Result<InteractionBatch> {
        let mut records =
            InteractionBatch::from_particles(self.kind(), particles, rows, materials);
        let deposit: Vec<f64> = rows.iter().map(|&i| particles.energy[i]).collect();
        particles.deposit_rows(rows, &deposit);
        records.energy_deposit = deposit;
        Ok(records)
    }
}

/// Coherent (Rayleigh) scattering: the direction is deflected, the energy is
/// unchanged.
pub struct Coherent {
    attenuation: Arc<AttenuationDatabase>,
    energy_range: (f64, f64),
}

impl Coherent {
    /// Creates the process over the given tables.
    #[must_use]
    pub fn new(attenuation: Arc<AttenuationDatabase>) -> Self {
        Self {
            attenuation,
            energy_range: DEFAULT_ENERGY_RANGE,
        }
    }

    fn scatter(
        &self,
        kind: ProcessKind,
        particles: &mut ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
        rng: &mut Pcg64,
    ) -> (InteractionBatch, Vec<f64>) {
        let theta: Vec<f64> = rows
            .iter()
            .map(|&i| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let z = materials.get(i).zeff().max(1.0) as u16;
                sample_rayleigh(rng, particles.energy[i], z)
            })
            .collect();
        self.finish_scatter(kind, particles, rows, materials, rng, theta)
    }

    fn finish_scatter(
        &self,
        kind: ProcessKind,
        particles: &mut ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
        rng: &mut Pcg64,
        theta: Vec<f64>,
    ) -> (InteractionBatch, Vec<f64>) {
        let phi: Vec<f64> = rows.iter().map(|_| sample_phi(rng)).collect();
        let degraded = particles.rotate_rows(rows, &theta, &phi);
        drop_degraded(particles, &degraded);
        let mut records = InteractionBatch::from_particles(kind, particles, rows, materials);
        records.scattering_phi = phi;
        records.scattering_theta = theta.clone();
        (records, theta)
    }
}

impl Process for Coherent {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Coherent
    }

    fn attenuation(&self) -> &AttenuationDatabase {
        &self.attenuation
    }

    fn energy_range(&self) -> (f64, f64) {
        self.energy_range
    }

    fn apply(
        &self,
        particles: &mut ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
        rng: &mut Pcg64,
    ) -> Result<InteractionBatch> {
        let (records, _) = self.scatter(self.kind(), particles, rows, materials, rng);
        Ok(records)
    }
}

/// Incoherent (Compton) scattering: Klein–Nishina deflection with the
/// matching recoil energy transferred to the medium.
pub struct Compton {
    inner: Coherent,
}

impl Compton {
    /// Creates the process over the given tables.
    #[must_use]
    pub fn new(attenuation: Arc<AttenuationDatabase>) -> Self {
        Self {
            inner: Coherent::new(attenuation),
        }
    }

    /// Recoil energy for a photon of `energy` scattered by `theta`.
    #[must_use]
    pub fn energy_deposit(energy: f64, theta: f64) -> f64 {
        let k = energy / ELECTRON_REST_ENERGY;
        let k_one_minus_cos = k * (1.0 - theta.cos());
        energy * k_one_minus_cos / (1.0 + k_one_minus_cos)
    }
}

impl Process for Compton {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Incoherent
    }

    fn attenuation(&self) -> &AttenuationDatabase {
        self.inner.attenuation()
    }

    fn energy_range(&self) -> (f64, f64) {
        self.inner.energy_range
    }

    fn apply(
        &self,
        particles: &mut ParticleBatch,
        rows: &[usize],
        materials: &MaterialBatch,
        rng: &mut Pcg64,
    ) -> Result<InteractionBatch> {
        let theta: Vec<f64> = rows
            .iter()
            .map(|&i| sample_klein_nishina(rng, particles.energy[i]))
            .collect();
        let (mut records, theta) =
            self.inner
                .finish_scatter(self.kind(), particles, rows, materials, rng, theta);
        let deposit: Vec<f64> = rows
            .iter()
            .zip(&theta)
            .map(|(&i, &t)| Self::energy_deposit(particles.energy[i], t))
            .collect();
        particles.deposit_rows(rows, &deposit);
        records.energy_deposit = deposit;
        Ok(records)
    }
}
