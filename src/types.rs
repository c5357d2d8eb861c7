//! Common types and traits for integer 3D geometry.
//!
//! Every length in the station is a whole number of units. Positions and
//! dimensions share the same `Coords` type, with the axes named after the
//! container faces: width, depth (distance from the open face) and height.

use std::ops::Add;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A point or an extent in container space.
///
/// # Examples
/// ```
/// use station_stowage::types::Coords;
///
/// let start = Coords::new(0, 10, 0);
/// let dims = Coords::new(10, 10, 10);
/// assert_eq!(start + dims, Coords::new(10, 20, 10));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Coords {
    pub width: u32,
    pub depth: u32,
    pub height: u32,
}

impl Coords {
    /// Creates a new coordinate triple.
    ///
    /// # Parameters
    /// * `width` - Extent or offset along the width axis
    /// * `depth` - Extent or offset along the depth axis (0 = open face)
    /// * `height` - Extent or offset along the height axis
    #[inline]
    pub const fn new(width: u32, depth: u32, height: u32) -> Self {
        Self {
            width,
            depth,
            height,
        }
    }

    /// The container origin.
    #[inline]
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// Product of all three components.
    #[inline]
    pub fn volume(&self) -> u64 {
        u64::from(self.width) * u64::from(self.depth) * u64::from(self.height)
    }

    /// Checks if all components are strictly positive.
    #[inline]
    pub fn is_valid_dimension(&self) -> bool {
        self.width > 0 && self.depth > 0 && self.height > 0
    }

    /// Checks if this extent fits inside another one (component-wise `<=`).
    #[inline]
    pub fn fits_within(&self, outer: &Self) -> bool {
        self.width <= outer.width && self.depth <= outer.depth && self.height <= outer.height
    }

    /// Component-wise sum, `None` on overflow.
    #[inline]
    pub fn checked_add(&self, rhs: Self) -> Option<Self> {
        Some(Self::new(
            self.width.checked_add(rhs.width)?,
            self.depth.checked_add(rhs.depth)?,
            self.height.checked_add(rhs.height)?,
        ))
    }

    /// Largest start offset per axis at which `inner` still fits in `self`.
    ///
    /// `None` if `inner` exceeds `self` on any axis.
    #[inline]
    pub fn max_start_for(&self, inner: &Self) -> Option<Self> {
        Some(Self::new(
            self.width.checked_sub(inner.width)?,
            self.depth.checked_sub(inner.depth)?,
            self.height.checked_sub(inner.height)?,
        ))
    }
}

impl Add for Coords {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(
            self.width + rhs.width,
            self.depth + rhs.depth,
            self.height + rhs.height,
        )
    }
}

impl From<(u32, u32, u32)> for Coords {
    #[inline]
    fn from(tuple: (u32, u32, u32)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2)
    }
}

/// Axis-aligned orientation of an item inside a container.
///
/// Each variant names which item axes end up on the container's
/// width, depth and height axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Rotation {
    /// (width, depth, height)
    #[default]
    Identity,
    /// (depth, width, height)
    SwapWidthDepth,
    /// (width, height, depth)
    SwapDepthHeight,
    /// (height, depth, width)
    SwapWidthHeight,
    /// (depth, height, width)
    CycleForward,
    /// (height, width, depth)
    CycleBackward,
}

impl Rotation {
    /// All orientations in the order the placement scan tries them.
    pub const ALL: [Rotation; 6] = [
        Rotation::Identity,
        Rotation::SwapWidthDepth,
        Rotation::SwapDepthHeight,
        Rotation::SwapWidthHeight,
        Rotation::CycleForward,
        Rotation::CycleBackward,
    ];

    /// Applies the orientation to item dimensions.
    #[inline]
    pub fn apply(self, dims: Coords) -> Coords {
        let Coords {
            width: w,
            depth: d,
            height: h,
        } = dims;
        match self {
            Rotation::Identity => Coords::new(w, d, h),
            Rotation::SwapWidthDepth => Coords::new(d, w, h),
            Rotation::SwapDepthHeight => Coords::new(w, h, d),
            Rotation::SwapWidthHeight => Coords::new(h, d, w),
            Rotation::CycleForward => Coords::new(d, h, w),
            Rotation::CycleBackward => Coords::new(h, w, d),
        }
    }

    /// Distinct oriented extents for `dims`, identity first.
    ///
    /// With `allow_rotation == false` only the identity orientation is returned.
    pub fn orientations(dims: Coords, allow_rotation: bool) -> Vec<(Rotation, Coords)> {
        if !allow_rotation {
            return vec![(Rotation::Identity, dims)];
        }
        let mut result: Vec<(Rotation, Coords)> = Vec::with_capacity(Self::ALL.len());
        for rotation in Self::ALL {
            let oriented = rotation.apply(dims);
            if !result.iter().any(|(_, seen)| *seen == oriented) {
                result.push((rotation, oriented));
            }
        }
        result
    }
}

/// Trait for objects with 3D dimensions.
pub trait Dimensional {
    /// Returns the dimensions of the object.
    fn dimensions(&self) -> Coords;

    /// Calculates the volume.
    fn volume(&self) -> u64 {
        self.dimensions().volume()
    }
}

/// Trait for objects with a position in container space.
pub trait Positioned {
    /// Returns the start corner (nearest the origin).
    fn position(&self) -> Coords;
}

/// Trait for objects with mass.
pub trait Weighted {
    /// Returns the mass in kg.
    fn mass(&self) -> f64;
}

/// Axis-aligned box given by its start and (exclusive) end corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub min: Coords,
    pub max: Coords,
}

impl BoundingBox {
    #[inline]
    pub const fn new(min: Coords, max: Coords) -> Self {
        Self { min, max }
    }

    /// Creates a bounding box from start corner and extent.
    #[inline]
    pub fn from_position_and_dims(position: Coords, dims: Coords) -> Self {
        Self {
            min: position,
            max: position + dims,
        }
    }

    /// Checks if two boxes share interior volume.
    ///
    /// Touching faces do not count as an intersection.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        !(self.max.width <= other.min.width
            || other.max.width <= self.min.width
            || self.max.depth <= other.min.depth
            || other.max.depth <= self.min.depth
            || self.max.height <= other.min.height
            || other.max.height <= self.min.height)
    }

    /// Checks if the box lies within `[0, bounds]` on every axis.
    #[inline]
    pub fn is_within(&self, bounds: &Coords) -> bool {
        self.max.fits_within(bounds)
    }

    /// Returns the extent (width, depth, height).
    #[inline]
    pub fn dimensions(&self) -> Coords {
        Coords::new(
            self.max.width - self.min.width,
            self.max.depth - self.min.depth,
            self.max.height - self.min.height,
        )
    }

    #[inline]
    pub fn volume(&self) -> u64 {
        self.dimensions().volume()
    }
}

/// Validation functions shared by the record constructors.
pub mod validation {
    use super::Coords;

    /// Validates all three dimensions of a 3D object.
    ///
    /// # Returns
    /// `Ok(())` for strictly positive extents, otherwise error text
    pub fn validate_dimensions_3d(dims: Coords, subject: &str) -> Result<(), String> {
        for (value, axis) in [
            (dims.width, "width"),
            (dims.depth, "depth"),
            (dims.height, "height"),
        ] {
            if value == 0 {
                return Err(format!("{} {} must be positive, got: 0", subject, axis));
            }
        }
        Ok(())
    }

    /// Validates a mass value.
    pub fn validate_mass(value: f64) -> Result<(), String> {
        if value.is_nan() {
            return Err("Mass must not be NaN".to_string());
        }
        if value.is_infinite() {
            return Err("Mass must not be infinite".to_string());
        }
        if value < 0.0 {
            return Err(format!("Mass must not be negative, got: {}", value));
        }
        Ok(())
    }

    /// Validates an item priority (1 to 100).
    pub fn validate_priority(value: u8) -> Result<(), String> {
        if !(1..=100).contains(&value) {
            return Err(format!("Priority must be between 1 and 100, got: {}", value));
        }
        Ok(())
    }

    /// Validates a record identifier.
    pub fn validate_id(value: &str, subject: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err(format!("{} id must not be empty", subject));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coords_volume_and_fit() {
        let dims = Coords::new(10, 20, 30);
        assert_eq!(dims.volume(), 6000);
        assert!(Coords::new(5, 5, 5).fits_within(&dims));
        assert!(!Coords::new(11, 5, 5).fits_within(&dims));
    }

    #[test]
    fn test_max_start_for() {
        let container = Coords::new(10, 10, 10);
        assert_eq!(
            container.max_start_for(&Coords::new(10, 4, 1)),
            Some(Coords::new(0, 6, 9))
        );
        assert_eq!(container.max_start_for(&Coords::new(11, 1, 1)), None);
    }

    #[test]
    fn test_bounding_box_touching_faces_do_not_intersect() {
        let a = BoundingBox::from_position_and_dims(Coords::zero(), Coords::new(10, 10, 10));
        let touching = BoundingBox::from_position_and_dims(
            Coords::new(0, 10, 0),
            Coords::new(10, 10, 10),
        );
        let overlapping =
            BoundingBox::from_position_and_dims(Coords::new(5, 5, 5), Coords::new(10, 10, 10));

        assert!(!a.intersects(&touching));
        assert!(a.intersects(&overlapping));
        assert!(overlapping.intersects(&a));
    }

    #[test]
    fn test_bounding_box_within_bounds() {
        let bounds = Coords::new(10, 10, 10);
        let inside = BoundingBox::from_position_and_dims(Coords::zero(), bounds);
        let outside = BoundingBox::from_position_and_dims(Coords::new(1, 0, 0), bounds);
        assert!(inside.is_within(&bounds));
        assert!(!outside.is_within(&bounds));
    }

    #[test]
    fn test_rotation_orientations_are_deduplicated() {
        let cube = Coords::new(4, 4, 4);
        assert_eq!(Rotation::orientations(cube, true).len(), 1);

        let slab = Coords::new(1, 2, 3);
        let all = Rotation::orientations(slab, true);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], (Rotation::Identity, slab));
        assert!(all.iter().all(|(_, d)| d.volume() == 6));

        assert_eq!(Rotation::orientations(slab, false).len(), 1);
    }

    #[test]
    fn test_validation() {
        assert!(validation::validate_dimensions_3d(Coords::new(1, 1, 1), "Item").is_ok());
        assert!(validation::validate_dimensions_3d(Coords::new(1, 0, 1), "Item").is_err());
        assert!(validation::validate_mass(0.0).is_ok());
        assert!(validation::validate_mass(-1.0).is_err());
        assert!(validation::validate_mass(f64::NAN).is_err());
        assert!(validation::validate_priority(100).is_ok());
        assert!(validation::validate_priority(0).is_err());
        assert!(validation::validate_priority(101).is_err());
        assert!(validation::validate_id(" ", "Item").is_err());
    }
}
