//! Geometric helpers for collision and access-path checks.
//!
//! The open face of every container lies at depth = 0, so an item is reached by
//! sliding it out along the depth axis towards the origin.

use crate::model::Placement;

/// Checks whether two placements share interior volume.
///
/// Uses axis-aligned bounding box intersection: two boxes do NOT intersect
/// when they are separated on at least one axis. Touching faces are allowed.
pub fn intersects(a: &Placement, b: &Placement) -> bool {
    a.bounding_box().intersects(&b.bounding_box())
}

/// Length of the overlap of two half-open intervals, at least 0.
///
/// # Example
/// ```
/// use station_stowage::geometry::overlap_1d;
///
/// assert_eq!(overlap_1d(0, 5, 3, 8), 2);
/// assert_eq!(overlap_1d(0, 5, 5, 8), 0);
/// ```
pub fn overlap_1d(a1: u32, a2: u32, b1: u32, b2: u32) -> u32 {
    a2.min(b2).saturating_sub(a1.max(b1))
}

/// Strict 1-D overlap: the intervals share more than an end point.
#[inline]
pub fn intervals_overlap(a1: u32, a2: u32, b1: u32, b2: u32) -> bool {
    overlap_1d(a1, a2, b1, b2) > 0
}

/// Checks if `other` obstructs the path of `target` to the open face.
///
/// `other` must start nearer the open face and its width-height cross section
/// must intersect the target's.
pub fn blocks_access(other: &Placement, target: &Placement) -> bool {
    other.start.depth < target.start.depth
        && intervals_overlap(other.start.width, other.end.width, target.start.width, target.end.width)
        && intervals_overlap(
            other.start.height,
            other.end.height,
            target.start.height,
            target.end.height,
        )
}
