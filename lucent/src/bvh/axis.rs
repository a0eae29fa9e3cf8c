use std::ops::Index;

use glam::Vec3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::X, Self::Y, Self::Z].into_iter()
    }

    /// Axis of `extent`'s greatest component; ties go to the earlier axis.
    pub fn widest(extent: Vec3) -> Self {
        if extent.x >= extent.y && extent.x >= extent.z {
            Self::X
        } else if extent.y >= extent.z {
            Self::Y
        } else {
            Self::Z
        }
    }
}

impl From<Axis> for usize {
    fn from(axis: Axis) -> Self {
        axis as usize
    }
}

impl Index<Axis> for Vec3 {
    type Output = f32;

    fn index(&self, axis: Axis) -> &Self::Output {
        &self[axis as usize]
    }
}
