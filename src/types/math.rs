use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Sub;

use ordered_float::OrderedFloat;
use serde::Serialize;

/// A 3 component vector as the engine networks it.
///
/// Equality is exact (bitwise on the ordered float value), NaN equals NaN.
/// Decoded vectors are compared for determinism so an epsilon comparison
/// would hide real differences.
#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vector { x, y, z }
    }

    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn dist_to(&self, other: &Self) -> f32 {
        (*self - *other).len()
    }

    pub fn abs2(&self) -> f32 {
        self.dot(self)
    }

    pub fn len(&self) -> f32 {
        self.abs2().sqrt()
    }

    pub fn xy(&self) -> VectorXY {
        VectorXY { x: self.x, y: self.y }
    }

    fn key(&self) -> [OrderedFloat<f32>; 3] {
        [OrderedFloat(self.x), OrderedFloat(self.y), OrderedFloat(self.z)]
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Vector {}

impl Hash for Vector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl Display for Vector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Sub for Vector {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Vector {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl From<VectorXY> for Vector {
    fn from(value: VectorXY) -> Self {
        value.xyz()
    }
}

impl From<Vector> for [f32; 3] {
    fn from(vec: Vector) -> Self {
        [vec.x, vec.y, vec.z]
    }
}

////////////////
/// VectorXY

#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct VectorXY {
    pub x: f32,
    pub y: f32,
}

impl VectorXY {
    pub fn new(x: f32, y: f32) -> Self {
        VectorXY { x, y }
    }

    /// {x, y, 0}
    pub fn xyz(&self) -> Vector {
        Vector { x: self.x, y: self.y, z: 0.0 }
    }

    fn key(&self) -> [OrderedFloat<f32>; 2] {
        [OrderedFloat(self.x), OrderedFloat(self.y)]
    }
}

impl PartialEq for VectorXY {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for VectorXY {}

impl Hash for VectorXY {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl Display for VectorXY {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "XY({}, {})", self.x, self.y)
    }
}

impl From<Vector> for VectorXY {
    fn from(value: Vector) -> Self {
        value.xy()
    }
}

impl From<VectorXY> for [f32; 2] {
    fn from(vec: VectorXY) -> Self {
        [vec.x, vec.y]
    }
}
