use glam::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Axis-aligned bounding box.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::empty()
    }
}

impl Display for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(min: ({}, {}, {}), max: ({}, {}, {}))",
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        )
    }
}

impl Aabb {
    #[inline]
    pub fn empty() -> Aabb {
        Aabb {
            min: [1e34; 3],
            max: [-1e34; 3],
        }
    }

    #[inline]
    pub fn from_points<T: Into<[f32; 3]>>(min: T, max: T) -> Aabb {
        Aabb {
            min: min.into(),
            max: max.into(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        let (min, max) = self.points::<Vec3A>();
        min.cmple(max).all()
    }

    #[inline]
    pub fn grow<T: Into<[f32; 3]>>(&mut self, pos: T) {
        let pos = Vec3A::from(pos.into());
        let (min, max) = self.points::<Vec3A>();
        self.min = min.min(pos).into();
        self.max = max.max(pos).into();
    }

    #[inline]
    pub fn grow_bb(&mut self, aabb: &Aabb) {
        let (min, max) = self.points::<Vec3A>();
        let (a_min, a_max) = aabb.points::<Vec3A>();
        self.min = min.min(a_min).into();
        self.max = max.max(a_max).into();
    }

    #[inline]
    pub fn union_of(&self, aabb: &Aabb) -> Aabb {
        let (min, max) = self.points::<Vec3A>();
        let (a_min, a_max) = aabb.points::<Vec3A>();
        Aabb {
            min: min.min(a_min).into(),
            max: max.max(a_max).into(),
        }
    }

    #[inline]
    pub fn offset_by(&mut self, delta: f32) {
        let delta = Vec3A::splat(delta);
        let (min, max) = self.points::<Vec3A>();
        self.min = (min - delta).into();
        self.max = (max + delta).into();
    }

    /// True when `aabb` lies within self, allowing `eps` of slack.
    #[inline]
    pub fn contains_bb(&self, aabb: &Aabb, eps: f32) -> bool {
        let (min, max) = self.points::<Vec3A>();
        let (a_min, a_max) = aabb.points::<Vec3A>();
        let eps = Vec3A::splat(eps);
        a_min.cmpge(min - eps).all() && a_max.cmple(max + eps).all()
    }

    #[inline]
    pub fn half_area(&self) -> f32 {
        let d = self.diagonal::<Vec3A>();
        let value = (d[0] + d[1]) * d[2] + d[0] * d[1];
        0.0_f32.max(value)
    }

    #[inline]
    pub fn center<T: From<[f32; 3]>>(&self) -> T {
        T::from(((Vec3A::from(self.min) + Vec3A::from(self.max)) * 0.5).into())
    }

    #[inline]
    pub fn extend_of(&self, axis: usize) -> f32 {
        self.max[axis] - self.min[axis]
    }

    #[inline]
    pub fn diagonal<T: From<[f32; 3]>>(&self) -> T {
        let (min, max) = self.points::<Vec3A>();
        T::from((max - min).into())
    }

    #[inline]
    pub fn longest_axis(&self) -> usize {
        let mut axis = 0;
        if self.extend_of(1) > self.extend_of(0) {
            axis = 1;
        }
        if self.extend_of(2) > self.extend_of(axis) {
            axis = 2;
        }
        axis
    }

    #[inline]
    pub fn points<T: From<[f32; 3]>>(&self) -> (T, T) {
        (self.min.into(), self.max.into())
    }

    /// Component-wise interpolation between two boxes.
    #[inline]
    pub fn lerp(&self, other: &Aabb, t: f32) -> Aabb {
        let (min, max) = self.points::<Vec3A>();
        let (o_min, o_max) = other.points::<Vec3A>();
        Aabb {
            min: min.lerp(o_min, t).into(),
            max: max.lerp(o_max, t).into(),
        }
    }
}

impl<T: Into<[f32; 3]>> From<(T, T)> for Aabb {
    fn from((min, max): (T, T)) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_invalid_until_grown() {
        let mut aabb = Aabb::empty();
        assert!(!aabb.is_valid());

        aabb.grow([1.0, 2.0, 3.0]);
        assert!(aabb.is_valid());
        assert_eq!(aabb.min, [1.0, 2.0, 3.0]);
        assert_eq!(aabb.max, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn half_area_of_unit_cube() {
        let aabb = Aabb::from_points([0.0; 3], [1.0; 3]);
        // (dx + dy) * dz + dx * dy
        assert_eq!(aabb.half_area(), 3.0);
    }

    #[test]
    fn union_and_containment() {
        let a = Aabb::from_points([0.0; 3], [1.0; 3]);
        let b = Aabb::from_points([2.0, 0.0, 0.0], [3.0, 1.0, 1.0]);
        let u = a.union_of(&b);
        assert!(u.contains_bb(&a, 0.0));
        assert!(u.contains_bb(&b, 0.0));
        assert!(!a.contains_bb(&b, 0.0));
        assert_eq!(u.min, [0.0, 0.0, 0.0]);
        assert_eq!(u.max, [3.0, 1.0, 1.0]);
    }

    #[test]
    fn longest_axis_picks_widest_extent() {
        let aabb = Aabb::from_points([0.0, 0.0, 0.0], [1.0, 4.0, 2.0]);
        assert_eq!(aabb.longest_axis(), 1);
    }

    #[test]
    fn lerp_moves_between_endpoints() {
        let a = Aabb::from_points([0.0; 3], [1.0; 3]);
        let b = Aabb::from_points([2.0; 3], [3.0; 3]);
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid.min, [1.0; 3]);
        assert_eq!(mid.max, [2.0; 3]);
    }
}
