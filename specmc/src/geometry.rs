//! Geometric primitives and their ray queries.

use crate::math::Vec3;
use crate::units::UM;

/// How [`BoxShape::cast_path`] measures the distance to the next surface.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DistanceMethod {
    /// Slab-method ray casting: exact distance along the ray to the exit
    /// face (inside) or the first-hit entry face (outside).
    #[default]
    RayCasting,
    /// Signed-distance ray marching: direction-independent magnitude only.
    RayMarching,
}

/// An axis-aligned box centred at the local origin.
#[derive(Clone, Debug)]
pub struct BoxShape {
    half_size: Vec3,
    method: DistanceMethod,
    epsilon: f64,
}

impl BoxShape {
    /// Creates a box with the given full extents.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            half_size: Vec3::new(x / 2.0, y / 2.0, z / 2.0),
            method: DistanceMethod::default(),
            epsilon: 1.0 * UM,
        }
    }

    /// Selects the distance back-end.
    #[must_use]
    pub const fn with_method(mut self, method: DistanceMethod) -> Self {
        self.method = method;
        self
    }

    /// Overrides the past-surface step added to every returned distance.
    #[must_use]
    pub const fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Full extents of the box.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.half_size * 2.0
    }

    /// Half extents of the box.
    #[must_use]
    pub const fn half_size(&self) -> Vec3 {
        self.half_size
    }

    /// Full space diagonal.
    #[must_use]
    pub fn diameter(&self) -> f64 {
        self.size().norm()
    }

    /// Point-inside test; the boundary belongs to the box.
    #[must_use]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x.abs() <= self.half_size.x
            && p.y.abs() <= self.half_size.y
            && p.z.abs() <= self.half_size.z
    }

    /// Open complement of [`Self::contains`].
    #[must_use]
    pub fn is_outside(&self, p: Vec3) -> bool {
        (p.abs() - self.half_size).max_component() > 0.0
    }

    /// Distance to the next surface crossing along `direction`, plus whether
    /// `position` is inside. Inside points get the distance to the exit face,
    /// outside points the distance to the first-hit entry face or `+∞` on a
    /// miss. A small positive ε is added so the caller steps strictly past
    /// the surface.
    #[must_use]
    pub fn cast_path(&self, position: Vec3, direction: Vec3) -> (f64, bool) {
        match self.method {
            DistanceMethod::RayCasting => self.ray_casting(position, direction),
            DistanceMethod::RayMarching => self.ray_marching(position),
        }
    }

    fn ray_casting(&self, position: Vec3, direction: Vec3) -> (f64, bool) {
        let inside = self.contains(position);
        let pos = [position.x, position.y, position.z];
        let dir = [direction.x, direction.y, direction.z];
        let half = [self.half_size.x, self.half_size.y, self.half_size.z];

        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;
        for axis in 0..3 {
            if dir[axis].abs() < 1e-10 {
                // parallel to the slab: a point already outside it never hits
                if pos[axis].abs() > half[axis] {
                    t_max = f64::NEG_INFINITY;
                    break;
                }
            } else {
                let inv = 1.0 / dir[axis];
                let mut t1 = (-half[axis] - pos[axis]) * inv;
                let mut t2 = (half[axis] - pos[axis]) * inv;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                t_min = t_min.max(t1);
                t_max = t_max.min(t2);
                if t_min > t_max {
                    t_max = f64::NEG_INFINITY;
                    break;
                }
            }
        }

        let distance = if inside {
            t_max + self.epsilon
        } else if t_max > 0.0 && t_min < t_max {
            t_min.max(0.0) + self.epsilon
        } else {
            f64::INFINITY
        };
        (distance, inside)
    }

    fn ray_marching(&self, position: Vec3) -> (f64, bool) {
        let q = position.abs() - self.half_size;
        let outside_part = Vec3::new(q.x.max(0.0), q.y.max(0.0), q.z.max(0.0));
        let signed = outside_part.norm() + q.max_component().min(0.0);
        (signed.abs() + self.epsilon, signed < 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    const EPS: f64 = 1.0 * UM;

    #[test]
    fn containment_is_closed_outside_is_open() {
        let shape = BoxShape::new(2.0, 2.0, 2.0);
        assert!(shape.contains(Vec3::new(1.0, 0.0, 0.0)));
        assert!(!shape.is_outside(Vec3::new(1.0, 0.0, 0.0)));
        assert!(shape.is_outside(Vec3::new(1.0 + 1e-12, 0.0, 0.0)));
    }

    #[test]
    fn inside_point_reaches_exit_face() {
        let shape = BoxShape::new(10.0, 10.0, 10.0);
        let (distance, inside) =
            shape.cast_path(Vec3::new(0.0, 0.0, -3.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(inside);
        assert_approx_eq!(f64, distance, 8.0 + EPS, ulps = 4);
    }

    #[test]
    fn outside_point_reaches_entry_face() {
        let shape = BoxShape::new(10.0, 10.0, 10.0);
        let (distance, inside) =
            shape.cast_path(Vec3::new(0.0, 0.0, -8.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(!inside);
        assert_approx_eq!(f64, distance, 3.0 + EPS, ulps = 4);
    }

    #[test]
    fn miss_is_infinite() {
        let shape = BoxShape::new(2.0, 2.0, 2.0);
        let (distance, inside) =
            shape.cast_path(Vec3::new(5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(!inside);
        assert!(distance.is_infinite());
        // pointing at the box but moving away
        let (distance, _) = shape.cast_path(Vec3::new(5.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        assert!(distance.is_infinite());
    }

    #[test]
    fn ray_parallel_to_a_face_outside_never_enters() {
        let shape = BoxShape::new(2.0, 2.0, 2.0);
        let (distance, inside) =
            shape.cast_path(Vec3::new(0.0, 5.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(!inside);
        assert!(distance.is_infinite());
    }

    #[test]
    fn exit_distance_is_bounded_by_the_diameter() {
        let shape = BoxShape::new(4.0, 3.0, 2.0);
        let dir = Vec3::new(0.6, -0.64, 0.48).normalized();
        let (distance, inside) = shape.cast_path(Vec3::new(0.5, -0.2, 0.1), dir);
        assert!(inside);
        assert!(distance <= shape.diameter() + EPS);
    }

    #[test]
    fn ray_marching_returns_magnitudes() {
        let shape = BoxShape::new(4.0, 4.0, 4.0).with_method(DistanceMethod::RayMarching);
        let (distance, inside) = shape.cast_path(Vec3::new(0.0, 0.0, 0.0), Vec3::ZERO);
        assert!(inside);
        assert_approx_eq!(f64, distance, 2.0 + EPS, ulps = 4);
        let (distance, inside) = shape.cast_path(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        assert!(!inside);
        assert_approx_eq!(f64, distance, 3.0 + EPS, ulps = 4);
    }

    #[test]
    fn grazing_corner_ray_enters_once() {
        let shape = BoxShape::new(2.0, 2.0, 2.0);
        // on the +z face, direction exactly normal to it: the ray exits in one
        // step and never re-enters
        let (distance, inside) =
            shape.cast_path(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(inside);
        assert_approx_eq!(f64, distance, EPS, ulps = 16);
    }
}
