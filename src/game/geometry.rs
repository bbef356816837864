//! 2D vector and axis-aligned box primitives

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg};

/// Immutable 2D vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Horizontal sign flip
    pub fn invert_x(self) -> Self {
        Self::new(-self.x, self.y)
    }

    /// Vertical sign flip
    pub fn invert_y(self) -> Self {
        Self::new(self.x, -self.y)
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        self.scale(rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

/// Axis-aligned bounding box described by its center and half extents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub center_x: f64,
    pub center_y: f64,
    pub half_width: f64,
    pub half_height: f64,
}

impl Rect {
    pub fn new(center: Vec2, width: f64, height: f64) -> Self {
        Self {
            center_x: center.x,
            center_y: center.y,
            half_width: width / 2.0,
            half_height: height / 2.0,
        }
    }

    pub fn left(&self) -> f64 {
        self.center_x - self.half_width
    }

    pub fn right(&self) -> f64 {
        self.center_x + self.half_width
    }

    pub fn top(&self) -> f64 {
        self.center_y - self.half_height
    }

    pub fn bottom(&self) -> f64 {
        self.center_y + self.half_height
    }

    /// Touching edges count as overlap
    pub fn overlaps(&self, other: &Rect) -> bool {
        (self.center_x - other.center_x).abs() <= self.half_width + other.half_width
            && (self.center_y - other.center_y).abs() <= self.half_height + other.half_height
    }

    /// True when the horizontal extents overlap, ignoring the vertical axis
    pub fn overlaps_x(&self, other: &Rect) -> bool {
        (self.center_x - other.center_x).abs() <= self.half_width + other.half_width
    }
}
