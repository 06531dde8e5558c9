use crate::aabb::Aabb;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Closed time interval, a sub-range of the [0, 1] shutter window.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub lower: f32,
    pub upper: f32,
}

impl Default for TimeSpan {
    fn default() -> Self {
        TimeSpan::UNIT
    }
}

impl Display for TimeSpan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

impl TimeSpan {
    pub const UNIT: TimeSpan = TimeSpan {
        lower: 0.0,
        upper: 1.0,
    };

    #[inline]
    pub fn new(lower: f32, upper: f32) -> TimeSpan {
        debug_assert!(lower <= upper);
        TimeSpan { lower, upper }
    }

    #[inline]
    pub fn size(&self) -> f32 {
        self.upper - self.lower
    }

    #[inline]
    pub fn lerp(&self, t: f32) -> f32 {
        self.lower + t * (self.upper - self.lower)
    }

    /// True when `t` lies strictly inside the interval.
    #[inline]
    pub fn contains_inner(&self, t: f32) -> bool {
        t > self.lower && t < self.upper
    }
}

/// Bounds of a primitive over a time interval: a pair of boxes whose
/// component-wise interpolation bounds the primitive at every time in
/// the interval.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct LinearBounds {
    pub begin: Aabb,
    pub end: Aabb,
}

impl Default for LinearBounds {
    fn default() -> Self {
        LinearBounds::empty()
    }
}

impl LinearBounds {
    #[inline]
    pub fn empty() -> LinearBounds {
        LinearBounds {
            begin: Aabb::empty(),
            end: Aabb::empty(),
        }
    }

    #[inline]
    pub fn new(begin: Aabb, end: Aabb) -> LinearBounds {
        LinearBounds { begin, end }
    }

    /// Bounds of a primitive that does not move over the interval.
    #[inline]
    pub fn from_static(aabb: Aabb) -> LinearBounds {
        LinearBounds {
            begin: aabb,
            end: aabb,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.begin.is_valid() && self.end.is_valid()
    }

    #[inline]
    pub fn extend(&mut self, other: &LinearBounds) {
        self.begin.grow_bb(&other.begin);
        self.end.grow_bb(&other.end);
    }

    /// Box bounding the primitive at parameter `t` of the interval.
    #[inline]
    pub fn interpolate(&self, t: f32) -> Aabb {
        self.begin.lerp(&self.end, t)
    }

    /// Conservative bounds over the whole interval.
    #[inline]
    pub fn global(&self) -> Aabb {
        self.begin.union_of(&self.end)
    }

    /// Time-average of the half-area of the interpolated box. The mean of
    /// the endpoint half-areas is exact for boxes whose diagonal varies
    /// linearly and a consistent approximation otherwise.
    #[inline]
    pub fn expected_half_area(&self) -> f32 {
        0.5 * (self.begin.half_area() + self.end.half_area())
    }
}
