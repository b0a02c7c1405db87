//! Scalar unit factors for the internal unit system.
//!
//! Internally all lengths are millimetres, energies MeV, times nanoseconds and
//! densities g/mm³, so that a linear attenuation coefficient (1/mm) times a
//! path length (mm) is a dimensionless optical depth. Multiply a literal by
//! one of these factors to convert it into internal units:
//!
//! ```
//! use specmc::units::{CM, KEV};
//!
//! let thickness = 10.0 * CM; // 100 mm
//! let energy = 140.5 * KEV; // 0.1405 MeV
//! ```

/// Millimetre, the internal length unit.
pub const MM: f64 = 1.0;
/// Micrometre.
pub const UM: f64 = 1e-3 * MM;
/// Centimetre.
pub const CM: f64 = 10.0 * MM;
/// Metre.
pub const M: f64 = 1e3 * MM;

/// MeV, the internal energy unit.
pub const MEV: f64 = 1.0;
/// keV.
pub const KEV: f64 = 1e-3 * MEV;
/// eV.
pub const EV: f64 = 1e-6 * KEV;

/// Nanosecond, the internal time unit.
pub const NS: f64 = 1.0;
/// Second.
pub const S: f64 = 1e9 * NS;
/// Minute.
pub const MIN: f64 = 60.0 * S;
/// Hour.
pub const HOUR: f64 = 3600.0 * S;

/// Becquerel (decays per second), expressed per internal time unit.
pub const BQ: f64 = 1.0 / S;
/// Megabecquerel.
pub const MBQ: f64 = 1e6 * BQ;

/// g/cm³ expressed in the internal g/mm³ density unit.
pub const G_PER_CM3: f64 = 1.0 / (CM * CM * CM);
/// cm²/g, the unit mass attenuation coefficients are tabulated in.
pub const CM2_PER_G: f64 = CM * CM;

/// Degree in radians.
pub const DEGREE: f64 = std::f64::consts::PI / 180.0;

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn optical_depth_is_dimensionless() {
        // 0.1505 cm²/g at 1 g/cm³ over 10 cm gives the narrow-beam water
        // optical depth of 1.505.
        let mac = 0.1505 * CM2_PER_G;
        let density = 1.0 * G_PER_CM3;
        let depth = mac * density * (10.0 * CM);
        assert_approx_eq!(f64, depth, 1.505, ulps = 4);
    }

    #[test]
    fn activity_times_half_life_counts_nuclei() {
        let nuclei = 300.0 * MBQ * (6.0 * HOUR) / std::f64::consts::LN_2;
        assert!(nuclei > 9.0e12 && nuclei < 1.0e13);
    }
}
