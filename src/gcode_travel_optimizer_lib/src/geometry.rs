use std::ops;

use crate::Mm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: Mm,
    pub y: Mm,
    pub z: Mm,
}

impl Point {
    pub fn new(x: Mm, y: Mm, z: Mm) -> Point {
        Point { x, y, z }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: Mm,
    pub y: Mm,
    pub z: Mm,
}

impl Vec3 {
    // Travel within one layer pass happens at constant z, so only xy counts.
    pub fn planar_norm(&self) -> Mm {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl ops::Sub<Point> for Point {
    type Output = Vec3;

    fn sub(self, rhs: Point) -> Vec3 {
        Vec3 { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}

pub fn planar_distance(from: Point, to: Point) -> Mm {
    (to - from).planar_norm()
}

/// A machine position where each axis may still be unknown, eg. before the first move that
/// names the axis, or after a word for that axis failed to parse.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: Option<Mm>,
    pub y: Option<Mm>,
    pub z: Option<Mm>,
}

impl Position {
    pub const ORIGIN: Position = Position { x: Some(0.0), y: Some(0.0), z: Some(0.0) };

    pub fn new(x: Mm, y: Mm, z: Mm) -> Position {
        Position { x: Some(x), y: Some(y), z: Some(z) }
    }

    pub fn get(&self, axis: Axis) -> Option<Mm> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn set(&mut self, axis: Axis, value: Option<Mm>) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    /// The xy part is all the cost model needs; an unknown z reads as 0.
    pub fn planar(&self) -> Option<Point> {
        Some(Point { x: self.x?, y: self.y?, z: self.z.unwrap_or(0.0) })
    }

    /// True when every axis differs by at most `tolerance`. An axis unknown on both sides counts
    /// as the same; known on one side only never does.
    pub fn is_within(&self, other: &Position, tolerance: Mm) -> bool {
        Axis::ALL.iter().all(|&axis| match (self.get(axis), other.get(axis)) {
            (Some(a), Some(b)) => (a - b).abs() <= tolerance,
            (None, None) => true,
            _ => false,
        })
    }
}
