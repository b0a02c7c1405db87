//! Radioactive photon sources over voxelized activity distributions.

use crate::error::{Error, Result};
use crate::math::{Affine, Vec3};
use crate::particle::{ParticleBatch, PHOTON};
use crate::rng::Categorical;
use crate::units::{HOUR, KEV};
use ndarray::Array3;
use rand::Rng;
use rand_pcg::Pcg64;
use std::f64::consts::{LN_2, PI};

/// One discrete emission line of an isotope.
#[derive(Clone, Copy, Debug)]
pub struct EnergyLine {
    /// Line energy, MeV.
    pub energy: f64,
    /// Emission probability; the lines of an isotope sum to one.
    pub probability: f64,
}

/// A gamma emitter: a discrete energy spectrum and a half-life.
#[derive(Clone, Debug)]
pub struct Isotope {
    /// Isotope name.
    pub name: String,
    /// Discrete emission lines.
    pub lines: Vec<EnergyLine>,
    /// Half-life, ns.
    pub half_life: f64,
}

impl Isotope {
    /// Creates an isotope, checking that the line probabilities form a
    /// distribution and the half-life is positive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] otherwise.
    pub fn new(name: &str, lines: Vec<EnergyLine>, half_life: f64) -> Result<Self> {
        if half_life <= 0.0 {
            return Err(Error::Config(format!("{name}: non-positive half-life")));
        }
        let total: f64 = lines.iter().map(|line| line.probability).sum();
        if lines.is_empty() || (total - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "{name}: line probabilities sum to {total}"
            )));
        }
        Ok(Self {
            name: name.into(),
            lines,
            half_life,
        })
    }

    /// Tc-99m: a single 140.5 keV line, half-life 6.0067 h.
    #[must_use]
    pub fn tc99m() -> Self {
        Self {
            name: "Tc-99m".into(),
            lines: vec![EnergyLine {
                energy: 140.5 * KEV,
                probability: 1.0,
            }],
            half_life: 6.0067 * HOUR,
        }
    }

    /// Looks a preset isotope up by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "Tc-99m" | "Tc99m" => Ok(Self::tc99m()),
            other => Err(Error::Config(format!("unknown isotope preset: {other}"))),
        }
    }
}

/// A photon source over a voxelized non-negative activity distribution.
/// Emission times honour the exponential decay of the remaining nuclei; the
/// internal timer advances by the batch width on every emission.
pub struct Source {
    voxel_size: f64,
    isotope: Isotope,
    /// Initial activity, decays per ns.
    initial_activity: f64,
    /// Elapsed emission time, ns.
    timer: f64,
    /// Local source frame → world.
    transform: Affine,
    rng: Pcg64,
    /// Lower corners of the non-zero voxels, local frame.
    voxel_corners: Vec<Vec3>,
    voxel_sampler: Categorical,
    line_sampler: Categorical,
}

impl Source {
    /// Creates a source from a voxelized distribution. `activity` is the
    /// initial activity in internal units (decays per ns).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-positive activity or voxel size,
    /// or a distribution with negative or all-zero weights.
    pub fn new(
        distribution: &Array3<f32>,
        voxel_size: f64,
        activity: f64,
        isotope: Isotope,
        rng: Pcg64,
    ) -> Result<Self> {
        if activity <= 0.0 {
            return Err(Error::Config("source activity must be positive".into()));
        }
        if voxel_size <= 0.0 {
            return Err(Error::Config("source voxel size must be positive".into()));
        }
        let shape = distribution.dim();
        let size = Vec3::new(
            voxel_size * shape.0 as f64,
            voxel_size * shape.1 as f64,
            voxel_size * shape.2 as f64,
        );
        let mut voxel_corners = Vec::new();
        let mut weights = Vec::new();
        for ((i, j, k), &value) in distribution.indexed_iter() {
            if value < 0.0 {
                return Err(Error::Config("negative source distribution value".into()));
            }
            if value > 0.0 {
                voxel_corners.push(Vec3::new(
                    voxel_size.mul_add(i as f64, -size.x / 2.0),
                    voxel_size.mul_add(j as f64, -size.y / 2.0),
                    voxel_size.mul_add(k as f64, -size.z / 2.0),
                ));
                weights.push(f64::from(value));
            }
        }
        let voxel_sampler = Categorical::new(&weights)
            .map_err(|_| Error::Config("source distribution has no active voxels".into()))?;
        let line_probabilities: Vec<f64> =
            isotope.lines.iter().map(|line| line.probability).collect();
        let line_sampler = Categorical::new(&line_probabilities)?;
        Ok(Self {
            voxel_size,
            isotope,
            initial_activity: activity,
            timer: 0.0,
            transform: Affine::IDENTITY,
            rng,
            voxel_corners,
            voxel_sampler,
            line_sampler,
        })
    }

    /// A point source: a single unit voxel of one millimetre.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-positive activity.
    pub fn point(position: Vec3, activity: f64, isotope: Isotope, rng: Pcg64) -> Result<Self> {
        let distribution = Array3::<f32>::ones((1, 1, 1));
        let mut source = Self::new(&distribution, 1.0, activity, isotope, rng)?;
        source.translate(position);
        Ok(source)
    }

    /// Moves the source by `t` in the world frame.
    pub fn translate(&mut self, t: Vec3) {
        self.transform = Affine::translation(t).compose(&self.transform);
    }

    /// Rotates the source by the z-y-x Euler angles about `center`, world
    /// frame.
    pub fn rotate(&mut self, alpha: f64, beta: f64, gamma: f64, center: Vec3) {
        let rotation = Affine::translation(center)
            .compose(&Affine::rotation(alpha, beta, gamma))
            .compose(&Affine::translation(-center));
        self.transform = rotation.compose(&self.transform);
    }

    /// The isotope this source emits.
    #[must_use]
    pub const fn isotope(&self) -> &Isotope {
        &self.isotope
    }

    /// Elapsed emission time, ns.
    #[must_use]
    pub const fn timer(&self) -> f64 {
        self.timer
    }

    /// Current activity, decays per ns.
    #[must_use]
    pub fn activity(&self) -> f64 {
        self.initial_activity * (-self.timer / self.isotope.half_life).exp2()
    }

    /// Nuclei remaining at the current timer.
    #[must_use]
    pub fn nuclei_count(&self) -> f64 {
        self.activity() * self.isotope.half_life / LN_2
    }

    /// Reseeds the timer and optionally swaps the generator state, for
    /// resuming a run from a previous timer value.
    pub fn set_state(&mut self, timer: Option<f64>, rng: Option<Pcg64>) {
        if let Some(timer) = timer {
            self.timer = timer;
        }
        if let Some(rng) = rng {
            self.rng = rng;
        }
    }

    fn sample_directions(&mut self, n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|_| {
                let cos_alpha = 2.0f64.mul_add(-self.rng.gen::<f64>(), 1.0);
                let beta = 2.0 * PI * self.rng.gen::<f64>();
                let sine = (1.0 - cos_alpha * cos_alpha).sqrt();
                Vec3::new(cos_alpha, sine * beta.cos(), sine * beta.sin())
            })
            .collect()
    }

    fn sample_positions(&mut self, n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|_| {
                let corner = self.voxel_corners[self.voxel_sampler.sample(&mut self.rng)];
                let jitter = Vec3::new(
                    self.rng.gen::<f64>() * self.voxel_size,
                    self.rng.gen::<f64>() * self.voxel_size,
                    self.rng.gen::<f64>() * self.voxel_size,
                );
                self.transform.transform_point(corner + jitter)
            })
            .collect()
    }

    /// Draws emission times distributed in strict proportion to the decay
    /// curve over the interval the batch spans, then advances the timer by
    /// that interval.
    fn sample_emission_times(&mut self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let half_life = self.isotope.half_life;
        let nuclei = self.nuclei_count();
        let dt = ((nuclei + n as f64) / nuclei).ln() * half_life / LN_2;
        let upper = (-self.timer / half_life).exp2();
        let lower = (-(self.timer + dt) / half_life).exp2();
        let times = (0..n)
            .map(|_| {
                let alpha = (upper - lower).mul_add(self.rng.gen::<f64>(), lower);
                -alpha.ln() * half_life / LN_2
            })
            .collect();
        self.timer += dt;
        times
    }

    /// Emits a batch of `n` photons.
    pub fn emit(&mut self, n: usize) -> ParticleBatch {
        let energy: Vec<f64> = (0..n)
            .map(|_| self.isotope.lines[self.line_sampler.sample(&mut self.rng)].energy)
            .collect();
        let direction = self.sample_directions(n);
        let position = self.sample_positions(n);
        let emission_time = self.sample_emission_times(n);
        ParticleBatch::emitted(PHOTON, position, direction, energy, emission_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{MBQ, MM, S};
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;

    fn test_source(activity: f64) -> Source {
        Source::point(
            Vec3::ZERO,
            activity,
            Isotope::tc99m(),
            Pcg64::seed_from_u64(5),
        )
        .unwrap()
    }

    #[test]
    fn emitted_photons_carry_the_line_energy() {
        let mut source = test_source(300.0 * MBQ);
        let batch = source.emit(100);
        assert!(batch.energy.iter().all(|&e| (e - 140.5 * KEV).abs() < 1e-12));
    }

    #[test]
    fn directions_are_unit_and_isotropic() {
        let mut source = test_source(300.0 * MBQ);
        let batch = source.emit(20_000);
        for d in &batch.direction {
            assert!((d.norm() - 1.0).abs() < 1e-12);
        }
        // the x component is the sampled cosine, its mean vanishes
        let mean_x: f64 =
            batch.direction.iter().map(|d| d.x).sum::<f64>() / batch.len() as f64;
        assert!(mean_x.abs() < 0.02, "mean cos = {mean_x}");
    }

    #[test]
    fn positions_jitter_within_the_voxel() {
        let mut source = test_source(300.0 * MBQ);
        source.translate(Vec3::new(10.0, 0.0, 0.0));
        let batch = source.emit(1000);
        for p in &batch.position {
            assert!(p.x >= 10.0 - 0.5 * MM && p.x <= 10.0 + 0.5 * MM);
            assert!(p.y.abs() <= 0.5 * MM);
            assert!(p.z.abs() <= 0.5 * MM);
        }
    }

    #[test]
    fn timer_advances_with_each_batch() {
        let mut source = test_source(300.0 * MBQ);
        assert_approx_eq!(f64, source.timer(), 0.0, ulps = 1);
        let n = 1000;
        let nuclei = source.nuclei_count();
        let expected_dt =
            ((nuclei + f64::from(n)) / nuclei).ln() * source.isotope().half_life / LN_2;
        source.emit(n as usize);
        assert_approx_eq!(f64, source.timer(), expected_dt, ulps = 8);
    }

    #[test]
    fn emission_times_span_the_batch_interval() {
        let mut source = test_source(1.0 * MBQ);
        let batch = source.emit(10_000);
        let dt = source.timer();
        assert!(batch
            .emission_time
            .iter()
            .all(|&t| t >= 0.0 && t <= dt + 1e-6));
    }

    #[test]
    fn activity_decays_exponentially() {
        let mut source = test_source(300.0 * MBQ);
        let initial = source.activity();
        source.set_state(Some(source.isotope().half_life), None);
        assert_approx_eq!(f64, source.activity(), initial / 2.0, ulps = 8);
    }

    #[test]
    fn resumption_restores_the_timer() {
        let mut source = test_source(300.0 * MBQ);
        source.set_state(Some(2.0 * S), Some(Pcg64::seed_from_u64(9)));
        assert_approx_eq!(f64, source.timer(), 2.0 * S, ulps = 1);
    }

    #[test]
    fn negative_activity_is_rejected() {
        assert!(Source::point(
            Vec3::ZERO,
            -1.0,
            Isotope::tc99m(),
            Pcg64::seed_from_u64(0)
        )
        .is_err());
    }
}
